//! Project boundary: which images are open, and how results come back in.
//!
//! The real project format belongs to the imaging application. [`JsonProject`]
//! is a minimal manifest so the binary works on its own:
//!
//! ```json
//! { "images": [ { "name": "SampleA", "uri": "/data/SampleA.tif", "metadata": {} } ] }
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::convention::BackendKind;
use crate::core::metadata::KeyValues;
use crate::core::remote::ImageId;
use crate::infra::io::write_atomic;

static VIEWER_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<host>https?://[^/?#]+(?:/[^?#]*?)?)/webclient/\?show=image-(?P<id>\d+)$").unwrap()
});

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("unsupported image URI '{0}'")]
    UnsupportedUri(String),

    #[error("image {} does not exist", .0.display())]
    MissingImage(PathBuf),

    #[error("project file {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One image known to the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub name: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "KeyValues::is_empty")]
    pub metadata: KeyValues,
}

impl ProjectEntry {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self { name: name.into(), uri: uri.into(), metadata: KeyValues::new() }
    }

    pub fn source(&self) -> Result<ImageSource, ImportError> {
        ImageSource::from_uri(&self.uri)
    }
}

/// Where an entry's pixels live, decoded from its URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Local(PathBuf),
    Remote { host: String, image_id: ImageId },
}

impl ImageSource {
    /// Remote viewer URIs are remote-backed; `file://` URIs and bare paths
    /// are local; any other scheme is rejected.
    pub fn from_uri(uri: &str) -> Result<Self, ImportError> {
        let uri = uri.trim();

        if let Some(caps) = VIEWER_URI.captures(uri) {
            let image_id = caps["id"]
                .parse::<ImageId>()
                .map_err(|_| ImportError::UnsupportedUri(uri.to_string()))?;
            return Ok(ImageSource::Remote { host: caps["host"].to_string(), image_id });
        }

        if let Some(rest) = uri.strip_prefix("file://") {
            return Ok(ImageSource::Local(PathBuf::from(rest)));
        }

        if uri.is_empty() || uri.contains("://") {
            return Err(ImportError::UnsupportedUri(uri.to_string()));
        }

        Ok(ImageSource::Local(PathBuf::from(uri)))
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            ImageSource::Local(_) => BackendKind::Local,
            ImageSource::Remote { .. } => BackendKind::Remote,
        }
    }
}

/// Project collaborator used by the retrievers.
pub trait ProjectImporter {
    /// Images currently in the project, used for raw-name recovery.
    fn entries(&self) -> &[ProjectEntry];

    /// Resolve `uri` into project entries, name them, attach `metadata` and
    /// persist the project.
    fn import_by_uri(&mut self, uri: &str, metadata: &KeyValues) -> Result<Vec<ProjectEntry>, ImportError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProjectManifest {
    #[serde(default)]
    images: Vec<ProjectEntry>,
}

/// JSON-file project.
#[derive(Debug)]
pub struct JsonProject {
    path: PathBuf,
    manifest: ProjectManifest,
}

impl JsonProject {
    /// Open an existing manifest. Relative local paths are resolved against
    /// the manifest's folder.
    pub fn open(path: &Path) -> Result<Self, ImportError> {
        let text = std::fs::read_to_string(path)?;
        let mut manifest: ProjectManifest = serde_json::from_str(&text)
            .map_err(|source| ImportError::Manifest { path: path.to_path_buf(), source })?;

        let base = path.parent().unwrap_or(Path::new("."));
        for entry in &mut manifest.images {
            if let Ok(ImageSource::Local(p)) = ImageSource::from_uri(&entry.uri) {
                if p.is_relative() {
                    entry.uri = base.join(p).display().to_string();
                }
            }
        }

        debug!(path = %path.display(), images = manifest.images.len(), "opened project");
        Ok(Self { path: path.to_path_buf(), manifest })
    }

    /// Empty project that will be written to `path` on first import.
    pub fn create(path: &Path) -> Self {
        Self { path: path.to_path_buf(), manifest: ProjectManifest::default() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn find(&self, name: &str) -> Option<&ProjectEntry> {
        self.manifest.images.iter().find(|e| e.name == name)
    }

    /// Add an entry without touching the disk; call [`JsonProject::save`].
    pub fn push(&mut self, entry: ProjectEntry) {
        self.manifest.images.push(entry);
    }

    pub fn save(&self) -> Result<(), ImportError> {
        let json = serde_json::to_vec_pretty(&self.manifest)
            .map_err(|source| ImportError::Manifest { path: self.path.clone(), source })?;
        write_atomic(&self.path, &json)?;
        Ok(())
    }

    /// Name and canonical URI for `uri`.
    fn resolve(uri: &str) -> Result<(String, String), ImportError> {
        match ImageSource::from_uri(uri)? {
            ImageSource::Local(path) => {
                if !path.is_file() {
                    return Err(ImportError::MissingImage(path));
                }
                let canonical = dunce::canonicalize(&path)?;
                let name = canonical
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| canonical.display().to_string());
                Ok((name, canonical.display().to_string()))
            }
            ImageSource::Remote { host, image_id } => {
                Ok((format!("image-{image_id}"), crate::core::remote::viewer_uri(&host, image_id)))
            }
        }
    }
}

impl ProjectImporter for JsonProject {
    fn entries(&self) -> &[ProjectEntry] {
        &self.manifest.images
    }

    fn import_by_uri(&mut self, uri: &str, metadata: &KeyValues) -> Result<Vec<ProjectEntry>, ImportError> {
        let (name, canonical) = Self::resolve(uri)?;

        let entry = match self.manifest.images.iter_mut().find(|e| e.uri == canonical) {
            Some(existing) => {
                debug!(uri = %canonical, "image already in project; refreshing metadata");
                existing.metadata.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
                existing.clone()
            }
            None => {
                let mut entry = ProjectEntry::new(name, canonical);
                entry.metadata = metadata.clone();
                self.manifest.images.push(entry.clone());
                entry
            }
        };

        self.save()?;
        info!(name = %entry.name, uri = %entry.uri, "imported into project");
        Ok(vec![entry])
    }
}
