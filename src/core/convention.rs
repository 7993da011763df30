//! Folder and file naming convention of the deconvolution share.
//!
//! Provenance travels only through paths:
//!
//! ```text
//! <root>/<owner>/Raw/Local/<image>
//! <root>/<owner>/Raw/omero/<projectId_name>/<datasetId_name>/<image>
//! <root>/<owner>/Deconvolved/<tag>/.../<rawName>_<code>_hrm.<ext>
//! ```
//!
//! Every function here is pure; nothing touches the filesystem.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const RAW_FOLDER: &str = "Raw";
pub const DECONVOLVED_FOLDER: &str = "Deconvolved";
pub const LOCAL_FOLDER: &str = "Local";
pub const REMOTE_FOLDER: &str = "omero";
/// Project/dataset placeholder for images without a parent container
pub const ORPHAN_FOLDER: &str = "None";
pub const HRM_TAG: &str = "hrm";
/// Inserted between the raw image name and the code in retrieved folders
pub const DECONVOLVED_MARKER: &str = "_Deconvolved";
pub const ORPHAN_DATASET_PREFIX: &str = "HRM_";

/// Processing code length written by the deconvolution server.
pub const DEFAULT_CODE_LENGTH: usize = 13;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConventionError {
    #[error("'{filename}' does not match <name>_<{code_length}-char code>_hrm[.ext]")]
    ParseFailure { filename: String, code_length: usize },

    #[error("'{0}' is neither 'None' nor '<id>_<name>'")]
    MalformedContainerFolder(String),

    #[error("no dataset folder encloses {}", .0.display())]
    MissingDatasetFolder(PathBuf),

    #[error("unsupported backend tag '{0}'")]
    UnknownBackend(String),

    #[error("invalid processing code length {0}")]
    InvalidCodeLength(usize),
}

/// Where the raw image lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Local,
    Remote,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Local, BackendKind::Remote];

    /// Folder name below `Raw/` (and tag below `Deconvolved/`).
    pub fn folder_name(self) -> &'static str {
        match self {
            BackendKind::Local => LOCAL_FOLDER,
            BackendKind::Remote => REMOTE_FOLDER,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder_name())
    }
}

/// Project or dataset identity on the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: i64,
    pub name: String,
}

impl ContainerRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }

    /// `<id>_<name>`
    pub fn folder_name(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }
}

/// Backend-specific part of a raw destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawLocation {
    Local,
    Remote {
        project: Option<ContainerRef>,
        dataset: Option<ContainerRef>,
    },
}

impl RawLocation {
    pub fn backend(&self) -> BackendKind {
        match self {
            RawLocation::Local => BackendKind::Local,
            RawLocation::Remote { .. } => BackendKind::Remote,
        }
    }
}

/// Dataset a remote-backed result goes back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetFolder {
    /// `None`: the raw image had no dataset, a fresh one must be created
    Orphan,
    Existing { id: i64, name: String },
}

pub fn user_folder(root: &Path, owner: &str) -> PathBuf {
    root.join(owner)
}

pub fn raw_root(root: &Path, owner: &str) -> PathBuf {
    user_folder(root, owner).join(RAW_FOLDER)
}

pub fn deconvolved_root(root: &Path, owner: &str) -> PathBuf {
    user_folder(root, owner).join(DECONVOLVED_FOLDER)
}

/// Destination folder for a raw image sent to the share.
pub fn encode_raw_destination(root: &Path, owner: &str, location: &RawLocation) -> PathBuf {
    let base = raw_root(root, owner).join(location.backend().folder_name());
    match location {
        RawLocation::Local => base,
        RawLocation::Remote { project, dataset } => base
            .join(container_folder_name(project.as_ref()))
            .join(container_folder_name(dataset.as_ref())),
    }
}

/// `<id>_<name>` or `None` for a missing container.
pub fn container_folder_name(container: Option<&ContainerRef>) -> String {
    container.map_or_else(|| ORPHAN_FOLDER.to_string(), ContainerRef::folder_name)
}

/// Backend named by a tag folder, case-insensitive ("local", "OMERO", ...).
pub fn decode_deconvolved_folder(folder_name: &str) -> Result<BackendKind, ConventionError> {
    BackendKind::ALL
        .into_iter()
        .find(|b| b.folder_name().eq_ignore_ascii_case(folder_name))
        .ok_or_else(|| ConventionError::UnknownBackend(folder_name.to_string()))
}

/// Backend of any path below `Raw/` or `Deconvolved/`, read from the folder
/// that follows the first such marker.
pub fn backend_of_path(path: &Path) -> Result<BackendKind, ConventionError> {
    let names: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    let marker = names
        .iter()
        .position(|n| *n == RAW_FOLDER || *n == DECONVOLVED_FOLDER)
        .ok_or_else(|| ConventionError::UnknownBackend(path.display().to_string()))?;

    let tag = names
        .get(marker + 1)
        .ok_or_else(|| ConventionError::UnknownBackend(path.display().to_string()))?;

    decode_deconvolved_folder(tag)
}

/// Decode `None` or `<id>_<name>` (the name may contain underscores).
pub fn parse_dataset_folder(folder_name: &str) -> Result<DatasetFolder, ConventionError> {
    if folder_name == ORPHAN_FOLDER {
        return Ok(DatasetFolder::Orphan);
    }

    let malformed = || ConventionError::MalformedContainerFolder(folder_name.to_string());
    let (id, name) = folder_name.split_once('_').ok_or_else(malformed)?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let id = id.parse::<i64>().map_err(|_| malformed())?;

    Ok(DatasetFolder::Existing { id, name: name.to_string() })
}

/// Dataset folder of a remote-backed result: always the second folder below
/// the tag folder (`<tag>/<project>/<dataset>/...`). Anything deeper is a
/// per-result subfolder and is never decoded, whatever its name.
pub fn enclosing_dataset_folder(
    result_file: &Path,
    tag_folder: &Path,
) -> Result<(PathBuf, DatasetFolder), ConventionError> {
    let missing = || ConventionError::MissingDatasetFolder(result_file.to_path_buf());

    let rel = result_file.strip_prefix(tag_folder).map_err(|_| missing())?;
    let folders: Vec<&str> = rel
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .take(2)
        .collect();

    let [project, dataset] = folders[..] else {
        return Err(missing());
    };
    let folder = parse_dataset_folder(dataset).map_err(|_| missing())?;

    Ok((tag_folder.join(project).join(dataset), folder))
}

/// Raw name and processing code recovered from a result file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultName {
    pub raw_name: String,
    pub code: String,
}

/// Fixed-width matcher for `<name>_<code>_hrm[.ext]`.
///
/// The name itself may contain underscores; only a run of exactly
/// `code_length` alphanumerics directly before `_hrm` counts as the code.
#[derive(Debug, Clone)]
pub struct ResultNameParser {
    code_length: usize,
    pattern: Regex,
}

impl ResultNameParser {
    pub fn new(code_length: usize) -> Result<Self, ConventionError> {
        if code_length == 0 {
            return Err(ConventionError::InvalidCodeLength(code_length));
        }
        let pattern = Regex::new(&format!(
            r"^(?P<name>.+)_(?P<code>[A-Za-z0-9]{{{code_length}}})_{HRM_TAG}(?:\..*)?$"
        ))
        .map_err(|_| ConventionError::InvalidCodeLength(code_length))?;

        Ok(Self { code_length, pattern })
    }

    pub fn code_length(&self) -> usize {
        self.code_length
    }

    pub fn parse(&self, filename: &str) -> Result<ResultName, ConventionError> {
        let caps = self
            .pattern
            .captures(filename)
            .ok_or_else(|| ConventionError::ParseFailure {
                filename: filename.to_string(),
                code_length: self.code_length,
            })?;

        Ok(ResultName {
            raw_name: caps["name"].to_string(),
            code: caps["code"].to_string(),
        })
    }

    pub fn parse_path(&self, path: &Path) -> Result<ResultName, ConventionError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.parse(&name)
    }
}

/// One-shot form of [`ResultNameParser::parse`].
pub fn parse_result_filename(filename: &str, code_length: usize) -> Result<ResultName, ConventionError> {
    ResultNameParser::new(code_length)?.parse(filename)
}

/// `<rawImageName>_Deconvolved<code>`, the folder a local result is copied to.
pub fn deconvolved_folder_name(raw_image_name: &str, code: &str) -> String {
    format!("{raw_image_name}{DECONVOLVED_MARKER}{code}")
}

/// Name of an ad-hoc dataset for results whose raw image had none.
pub fn orphan_dataset_name(now: chrono::DateTime<chrono::Local>) -> String {
    format!("{ORPHAN_DATASET_PREFIX}{}", now.format("%Y-%m-%d_%H-%M-%S"))
}
