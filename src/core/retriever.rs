//! Bring deconvolved results back next to their raw image and into the project.
//!
//! A retriever runs three steps per result:
//!
//! 1. `build_target`: where the raw counterpart lives
//! 2. `send_back`: move the result there
//! 3. `to_project`: import the delivered result with its metadata
//!
//! Each step consumes the value produced by the previous one, so the steps
//! can only run in order.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::convention::{
    BackendKind, ContainerRef, ConventionError, DatasetFolder, ResultNameParser, deconvolved_folder_name,
    enclosing_dataset_folder, orphan_dataset_name,
};
use crate::core::discovery::DiscoveredFile;
use crate::core::matcher::best_match_by;
use crate::core::metadata::{self, Metadata};
use crate::core::project::{ImageSource, ImportError, ProjectEntry, ProjectImporter};
use crate::core::remote::{ImageId, RemoteError, RemoteStore};
use crate::infra::io::{atomic_copy_into, find_companion, siblings_with_stem, stem_before_first_dot, stem_before_last_dot};

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("the project has no local image to match '{raw_name}' against")]
    NoCandidate { raw_name: String },

    #[error("best match for '{raw_name}' is '{best}' with similarity {score:.2}, below the {floor:.2} floor")]
    BelowFloor {
        raw_name: String,
        best: String,
        score: f64,
        floor: f64,
    },

    #[error("result file {} does not exist", .0.display())]
    MissingResult(PathBuf),

    #[error("cannot create {}: {source}", path.display())]
    CreateTarget {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot copy {} into {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Convention(#[from] ConventionError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Import(#[from] ImportError),
}

/// A discovered result, decoded and enriched with its companions.
#[derive(Debug, Clone)]
pub struct DeconvolutionResult {
    pub result_file: PathBuf,
    /// `<root>/<owner>/Deconvolved/<tag>`
    pub tag_folder: PathBuf,
    pub raw_name: String,
    pub code: String,
    pub backend: BackendKind,
    pub metadata: Metadata,
    pub report_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl DeconvolutionResult {
    /// Decode the file name and backend, then load the parameter report.
    /// A missing or malformed report leaves the metadata empty.
    pub fn from_discovered(
        file: &DiscoveredFile,
        parser: &ResultNameParser,
        report_suffix: &str,
        log_suffix: &str,
    ) -> Result<Self, ConventionError> {
        let backend = file.backend()?;
        let name = parser.parse_path(&file.path)?;

        let report_file = find_companion(&file.path, report_suffix);
        let metadata = match &report_file {
            Some(report) => metadata::parse_report_file(report),
            None => {
                debug!(file = %file.path.display(), suffix = report_suffix, "no parameter report");
                Metadata::new()
            }
        };

        Ok(Self {
            result_file: file.path.clone(),
            tag_folder: file.tag_folder.clone(),
            raw_name: name.raw_name,
            code: name.code,
            backend,
            metadata,
            report_file,
            log_file: find_companion(&file.path, log_suffix),
        })
    }

    pub fn file_name(&self) -> String {
        self.result_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Per-item progress through the retrieve pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ItemStage {
    Discovered,
    TargetBuilt,
    SentBack,
    Imported,
    CleanedUp,
}

impl fmt::Display for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStage::Discovered => "discovered",
            ItemStage::TargetBuilt => "target built",
            ItemStage::SentBack => "sent back",
            ItemStage::Imported => "imported",
            ItemStage::CleanedUp => "cleaned up",
        };
        f.write_str(s)
    }
}

/// Outcome of one result. `failure` is set when the item stopped early;
/// `stage` is then the last step that succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub file: PathBuf,
    pub backend: Option<BackendKind>,
    pub stage: ItemStage,
    pub failure: Option<String>,
    /// Non-fatal problems, e.g. a cleanup that could not finish
    pub warnings: Vec<String>,
    pub entries: Vec<ProjectEntry>,
}

impl ItemReport {
    pub fn discovered(file: impl Into<PathBuf>, backend: Option<BackendKind>) -> Self {
        Self {
            file: file.into(),
            backend,
            stage: ItemStage::Discovered,
            failure: None,
            warnings: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn fail(mut self, reason: impl ToString) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.stage >= ItemStage::Imported
    }
}

pub trait Retriever {
    /// Where the result goes.
    type Target;
    /// Proof that the result was sent back.
    type Delivered;

    fn build_target(
        &self,
        result: &DeconvolutionResult,
        project: &dyn ProjectImporter,
    ) -> Result<Self::Target, RetrieveError>;

    fn send_back(&self, result: &DeconvolutionResult, target: Self::Target) -> Result<Self::Delivered, RetrieveError>;

    fn to_project(
        &self,
        result: &DeconvolutionResult,
        delivered: Self::Delivered,
        project: &mut dyn ProjectImporter,
    ) -> Result<Vec<ProjectEntry>, RetrieveError>;
}

/// Run the three steps in order, stopping at the first failure.
pub fn retrieve_one<R: Retriever + ?Sized>(
    retriever: &R,
    result: &DeconvolutionResult,
    project: &mut dyn ProjectImporter,
) -> ItemReport {
    let mut report = ItemReport::discovered(&result.result_file, Some(result.backend));

    let target = match retriever.build_target(result, &*project) {
        Ok(t) => t,
        Err(e) => return report.fail(e),
    };
    report.stage = ItemStage::TargetBuilt;

    let delivered = match retriever.send_back(result, target) {
        Ok(d) => d,
        Err(e) => return report.fail(e),
    };
    report.stage = ItemStage::SentBack;

    match retriever.to_project(result, delivered, project) {
        Ok(entries) => {
            report.entries = entries;
            report.stage = ItemStage::Imported;
            report
        }
        Err(e) => report.fail(e),
    }
}

/// Folder next to the raw image receiving a local result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTarget {
    pub folder: PathBuf,
    /// Project entry matched as the raw counterpart
    pub raw_entry: String,
}

/// Result copied into its target folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDelivery {
    pub image: PathBuf,
}

/// Results whose raw image is a plain file known to the project.
#[derive(Debug, Clone)]
pub struct LocalRetriever {
    min_similarity: f64,
}

impl LocalRetriever {
    pub fn new(min_similarity: f64) -> Self {
        Self { min_similarity }
    }
}

/// Entry name without its extension(s), which is what result names carry.
fn entry_stem(entry: &ProjectEntry) -> &str {
    stem_before_first_dot(Path::new(&entry.name)).unwrap_or(&entry.name)
}

impl Retriever for LocalRetriever {
    type Target = LocalTarget;
    type Delivered = LocalDelivery;

    fn build_target(
        &self,
        result: &DeconvolutionResult,
        project: &dyn ProjectImporter,
    ) -> Result<LocalTarget, RetrieveError> {
        if !result.result_file.is_file() {
            return Err(RetrieveError::MissingResult(result.result_file.clone()));
        }

        // Only plain-file entries can receive a local result
        let candidates: Vec<(&ProjectEntry, PathBuf)> = project
            .entries()
            .iter()
            .filter_map(|e| match e.source() {
                Ok(ImageSource::Local(path)) => Some((e, path)),
                _ => None,
            })
            .collect();

        let best = best_match_by(&candidates, &result.raw_name, |(e, _)| entry_stem(e))
            .ok_or_else(|| RetrieveError::NoCandidate { raw_name: result.raw_name.clone() })?;

        let (entry, raw_path) = best.candidate;
        if best.score <= 0.0 || best.score < self.min_similarity {
            return Err(RetrieveError::BelowFloor {
                raw_name: result.raw_name.clone(),
                best: entry.name.clone(),
                score: best.score,
                floor: self.min_similarity,
            });
        }

        let parent = raw_path.parent().unwrap_or(Path::new("."));
        let folder = parent.join(deconvolved_folder_name(entry_stem(entry), &result.code));

        debug!(raw = %entry.name, score = best.score, target = %folder.display(), "matched raw image");
        Ok(LocalTarget { folder, raw_entry: entry.name.clone() })
    }

    fn send_back(&self, result: &DeconvolutionResult, target: LocalTarget) -> Result<LocalDelivery, RetrieveError> {
        let image = target.folder.join(result.file_name());

        match fs::create_dir(&target.folder) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                info!(folder = %target.folder.display(), "results already retrieved; nothing copied");
                return Ok(LocalDelivery { image });
            }
            Err(source) => return Err(RetrieveError::CreateTarget { path: target.folder, source }),
        }

        let Some(stem) = stem_before_last_dot(&result.result_file) else {
            return Err(RetrieveError::MissingResult(result.result_file.clone()));
        };
        let copied = siblings_with_stem(&result.result_file, stem).and_then(|files| {
            files
                .iter()
                .map(|f| atomic_copy_into(f, &target.folder))
                .collect::<std::io::Result<Vec<_>>>()
        });

        match copied {
            Ok(files) => {
                debug!(files = files.len(), to = %target.folder.display(), "copied result files");
                Ok(LocalDelivery { image })
            }
            Err(source) => {
                // Leave no half-filled folder that a rerun would take as done
                if let Err(e) = fs::remove_dir_all(&target.folder) {
                    warn!(folder = %target.folder.display(), error = %e, "cannot remove partial target");
                }
                Err(RetrieveError::Copy {
                    from: result.result_file.clone(),
                    to: target.folder,
                    source,
                })
            }
        }
    }

    fn to_project(
        &self,
        result: &DeconvolutionResult,
        delivered: LocalDelivery,
        project: &mut dyn ProjectImporter,
    ) -> Result<Vec<ProjectEntry>, RetrieveError> {
        if !delivered.image.is_file() {
            return Err(RetrieveError::MissingResult(delivered.image));
        }
        let uri = delivered.image.display().to_string();
        Ok(project.import_by_uri(&uri, &result.metadata.flatten())?)
    }
}

/// Dataset receiving a remote-backed result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub dataset: ContainerRef,
    /// Freshly created orphan dataset
    pub created: bool,
}

/// Image now present on the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteDelivery {
    pub image: ImageId,
    /// False when a same-named image was already in the dataset
    pub uploaded: bool,
}

/// Results whose raw image came from the remote store.
pub struct RemoteRetriever<'a> {
    store: &'a dyn RemoteStore,
}

impl<'a> RemoteRetriever<'a> {
    pub fn new(store: &'a dyn RemoteStore) -> Self {
        Self { store }
    }

    fn annotate(&self, image: ImageId, result: &DeconvolutionResult) -> Result<(), RetrieveError> {
        for (namespace, values) in result.metadata.iter() {
            if values.is_empty() {
                continue;
            }
            self.store.attach_key_values(image, namespace, values)?;
        }

        match &result.log_file {
            Some(log) => self.store.attach_file(image, log)?,
            None => warn!(file = %result.result_file.display(), "no log file next to the result; nothing attached"),
        }
        Ok(())
    }
}

impl Retriever for RemoteRetriever<'_> {
    type Target = RemoteTarget;
    type Delivered = RemoteDelivery;

    fn build_target(
        &self,
        result: &DeconvolutionResult,
        _project: &dyn ProjectImporter,
    ) -> Result<RemoteTarget, RetrieveError> {
        if !result.result_file.is_file() {
            return Err(RetrieveError::MissingResult(result.result_file.clone()));
        }

        let (_, folder) = enclosing_dataset_folder(&result.result_file, &result.tag_folder)?;
        match folder {
            DatasetFolder::Orphan => {
                let name = orphan_dataset_name(chrono::Local::now());
                let dataset = self.store.create_dataset(&name)?;
                info!(dataset = dataset.id, %name, "created dataset for orphan image");
                Ok(RemoteTarget { dataset, created: true })
            }
            DatasetFolder::Existing { id, .. } => {
                let dataset = self.store.dataset(id)?;
                Ok(RemoteTarget { dataset, created: false })
            }
        }
    }

    fn send_back(&self, result: &DeconvolutionResult, target: RemoteTarget) -> Result<RemoteDelivery, RetrieveError> {
        let name = result.file_name();

        let existing = match self.store.list_child_images(target.dataset.id) {
            Ok(images) => images.into_iter().find(|i| i.name == name),
            Err(e) => {
                warn!(dataset = target.dataset.id, error = %e, "cannot list dataset images; uploading anyway");
                None
            }
        };

        let delivery = match existing {
            Some(image) => {
                info!(image = image.id, %name, "image already on the remote store; not uploaded");
                RemoteDelivery { image: image.id, uploaded: false }
            }
            None => {
                let id = self.store.upload_image(target.dataset.id, &result.result_file)?;
                debug!(image = id, dataset = target.dataset.id, "uploaded result");
                RemoteDelivery { image: id, uploaded: true }
            }
        };

        self.annotate(delivery.image, result)?;
        Ok(delivery)
    }

    fn to_project(
        &self,
        result: &DeconvolutionResult,
        delivered: RemoteDelivery,
        project: &mut dyn ProjectImporter,
    ) -> Result<Vec<ProjectEntry>, RetrieveError> {
        let uri = self.store.image_uri(delivered.image);
        Ok(project.import_by_uri(&uri, &result.metadata.flatten())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::KeyValues;
    use tempfile::TempDir;

    /// In-memory project that records imports.
    #[derive(Default)]
    struct MemProject {
        entries: Vec<ProjectEntry>,
        imported: Vec<(String, KeyValues)>,
    }

    impl ProjectImporter for MemProject {
        fn entries(&self) -> &[ProjectEntry] {
            &self.entries
        }

        fn import_by_uri(&mut self, uri: &str, metadata: &KeyValues) -> Result<Vec<ProjectEntry>, ImportError> {
            self.imported.push((uri.to_string(), metadata.clone()));
            Ok(vec![ProjectEntry::new(uri, uri)])
        }
    }

    fn local_result(tmp: &TempDir) -> DeconvolutionResult {
        let tag = tmp.path().join("share/alice/Deconvolved/local");
        fs::create_dir_all(&tag).unwrap();
        let file = tag.join("SampleA_1234567890123_hrm.ids");
        fs::write(&file, b"deconv").unwrap();
        fs::write(tag.join("SampleA_1234567890123_hrm.parameters.txt"), b"report").unwrap();
        fs::write(tag.join("Other_1234567890123_hrm.ids"), b"other").unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("Restoration", "SNR", "12.3");

        DeconvolutionResult {
            result_file: file,
            tag_folder: tag,
            raw_name: "SampleA".into(),
            code: "1234567890123".into(),
            backend: BackendKind::Local,
            metadata,
            report_file: None,
            log_file: None,
        }
    }

    fn project_with_raw(tmp: &TempDir) -> MemProject {
        let raw_dir = tmp.path().join("data");
        fs::create_dir_all(&raw_dir).unwrap();
        fs::write(raw_dir.join("SampleA.tif"), b"raw").unwrap();
        MemProject {
            entries: vec![
                ProjectEntry::new("Overview.tif", raw_dir.join("Overview.tif").display().to_string()),
                ProjectEntry::new("SampleA.tif", raw_dir.join("SampleA.tif").display().to_string()),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_local_pipeline_copies_siblings_and_imports() {
        let tmp = TempDir::new().unwrap();
        let result = local_result(&tmp);
        let mut project = project_with_raw(&tmp);

        let report = retrieve_one(&LocalRetriever::new(0.5), &result, &mut project);

        assert!(report.is_success(), "{:?}", report.failure);
        let folder = tmp.path().join("data/SampleA_Deconvolved1234567890123");
        assert!(folder.join("SampleA_1234567890123_hrm.ids").is_file());
        assert!(folder.join("SampleA_1234567890123_hrm.parameters.txt").is_file());
        assert!(!folder.join("Other_1234567890123_hrm.ids").exists());

        let (uri, kv) = &project.imported[0];
        assert!(uri.ends_with("SampleA_1234567890123_hrm.ids"));
        assert_eq!(kv.get("SNR").map(String::as_str), Some("12.3"));
    }

    #[test]
    fn test_local_existing_target_is_success() {
        let tmp = TempDir::new().unwrap();
        let result = local_result(&tmp);
        let mut project = project_with_raw(&tmp);
        let r = LocalRetriever::new(0.5);

        assert!(retrieve_one(&r, &result, &mut project).is_success());
        assert!(retrieve_one(&r, &result, &mut project).is_success());
        assert_eq!(project.imported.len(), 2);
    }

    #[test]
    fn test_local_below_floor_fails_at_discovered() {
        let tmp = TempDir::new().unwrap();
        let mut result = local_result(&tmp);
        result.raw_name = "zzzzzzzz".into();
        let mut project = project_with_raw(&tmp);

        let report = retrieve_one(&LocalRetriever::new(0.5), &result, &mut project);

        assert_eq!(report.stage, ItemStage::Discovered);
        assert!(report.failure.unwrap().contains("below"));
        assert!(project.imported.is_empty());
    }

    #[test]
    fn test_local_empty_project() {
        let tmp = TempDir::new().unwrap();
        let result = local_result(&tmp);
        let mut project = MemProject::default();

        let report = retrieve_one(&LocalRetriever::new(0.5), &result, &mut project);

        assert!(report.failure.unwrap().contains("no local image"));
    }

    #[test]
    fn test_local_remote_only_project_has_no_candidate() {
        let tmp = TempDir::new().unwrap();
        let result = local_result(&tmp);
        let mut project = MemProject {
            entries: vec![ProjectEntry::new("SampleA", "https://h/webclient/?show=image-3")],
            ..Default::default()
        };

        let report = retrieve_one(&LocalRetriever::new(0.5), &result, &mut project);

        assert_eq!(report.stage, ItemStage::Discovered);
        assert!(report.failure.unwrap().contains("no local image"));
    }

    #[test]
    fn test_local_match_ignores_closer_remote_entry() {
        let tmp = TempDir::new().unwrap();
        let result = local_result(&tmp);
        let raw_dir = tmp.path().join("data");
        fs::create_dir_all(&raw_dir).unwrap();
        fs::write(raw_dir.join("SampleA1.tif"), b"raw").unwrap();

        // The remote entry is an exact name match; the local one scores 0.875
        let mut project = MemProject {
            entries: vec![
                ProjectEntry::new("SampleA", "https://h/webclient/?show=image-3"),
                ProjectEntry::new("SampleA1.tif", raw_dir.join("SampleA1.tif").display().to_string()),
            ],
            ..Default::default()
        };

        let report = retrieve_one(&LocalRetriever::new(0.5), &result, &mut project);

        assert!(report.is_success(), "{:?}", report.failure);
        assert!(raw_dir.join("SampleA1_Deconvolved1234567890123/SampleA_1234567890123_hrm.ids").is_file());
    }

    #[test]
    fn test_stage_order() {
        assert!(ItemStage::Discovered < ItemStage::TargetBuilt);
        assert!(ItemStage::Imported < ItemStage::CleanedUp);
    }
}
