//! Batch driver for both directions.
//!
//! A batch runs strictly sequentially. Configuration problems (missing share
//! root, user folder or username) abort it before any work; everything else
//! is recorded per item and the batch moves on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::cleanup::{self, CleanupError};
use crate::core::convention::{
    BackendKind, ConventionError, RAW_FOLDER, ResultNameParser, user_folder,
};
use crate::core::discovery::{self, DiscoveredFile};
use crate::core::project::{ImageSource, ProjectEntry, ProjectImporter};
use crate::core::remote::{RemoteConnector, RemoteStore};
use crate::core::retriever::{
    DeconvolutionResult, ItemReport, ItemStage, LocalRetriever, RemoteRetriever, retrieve_one,
};
use crate::core::sender::{LocalSender, RemoteSender, TransferRecord, TransferStatus, send_one};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("no share root configured (use --root or share.root)")]
    NoRoot,

    #[error("share root {} is not a folder", .0.display())]
    RootMissing(PathBuf),

    #[error("user folder {} does not exist; ask the share administrator to enrol the user", .0.display())]
    UserFolderMissing(PathBuf),

    #[error("no username available")]
    MissingUsername,

    #[error(transparent)]
    Convention(#[from] ConventionError),
}

/// Settings a batch needs, resolved from flags, config and preferences.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub root: PathBuf,
    pub code_length: usize,
    pub result_extension: String,
    pub report_suffix: String,
    pub log_suffix: String,
    pub min_similarity: f64,
    /// Remote host used when a request does not name one
    pub default_host: Option<String>,
}

/// Incremental progress sink owned by the caller.
pub trait Progress {
    fn begin(&self, total: usize);
    fn item(&self, label: &str);
    fn finish(&self);
}

/// Progress sink that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn begin(&self, _total: usize) {}
    fn item(&self, _label: &str) {}
    fn finish(&self) {}
}

/// Cooperative cancellation, checked between items.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Request structure for a send batch
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub images: Vec<ProjectEntry>,
    pub username: Option<String>,
    pub host: Option<String>,
    pub overwrite: bool,
}

/// Request structure for a retrieve batch
#[derive(Debug, Clone, Default)]
pub struct RetrieveRequest {
    pub username: Option<String>,
    pub host: Option<String>,
    pub delete_deconvolved: bool,
    pub delete_raw: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendSummary {
    pub records: Vec<TransferRecord>,
    pub username: String,
    pub host: Option<String>,
    pub cancelled: bool,
}

impl SendSummary {
    pub fn total(&self) -> usize {
        self.records.len()
    }

    fn count(&self, f: impl Fn(&TransferStatus) -> bool) -> usize {
        self.records.iter().filter(|r| f(&r.status)).count()
    }

    pub fn sent(&self) -> usize {
        self.count(|s| *s == TransferStatus::Sent)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == TransferStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(TransferStatus::is_failed)
    }

    /// "N/M sent, K/M skipped, F/M failed"
    pub fn headline(&self) -> String {
        let m = self.total();
        format!(
            "{}/{m} sent, {}/{m} skipped, {}/{m} failed",
            self.sent(),
            self.skipped(),
            self.failed()
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveSummary {
    pub items: Vec<ItemReport>,
    pub username: String,
    pub host: Option<String>,
    pub cancelled: bool,
}

impl RetrieveSummary {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn retrieved(&self) -> usize {
        self.items.iter().filter(|i| i.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(|i| i.failure.is_some())
    }

    /// "N/M retrieved, F/M failed"
    pub fn headline(&self) -> String {
        let m = self.total();
        format!("{}/{m} retrieved, {}/{m} failed", self.retrieved(), self.failures().count())
    }
}

/// Remote session shared by a batch, or why there is none.
type Session = Result<Box<dyn RemoteStore>, String>;

pub struct TransferOrchestrator<'a> {
    settings: BatchSettings,
    connector: &'a dyn RemoteConnector,
    progress: &'a dyn Progress,
    cancel: CancelToken,
    ask_username: Option<Box<dyn Fn() -> Option<String> + 'a>>,
}

impl<'a> TransferOrchestrator<'a> {
    pub fn new(settings: BatchSettings, connector: &'a dyn RemoteConnector) -> Self {
        Self { settings, connector, progress: &NoProgress, cancel: CancelToken::new(), ask_username: None }
    }

    pub fn with_progress(mut self, progress: &'a dyn Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Last-resort username source, asked at most once per batch.
    pub fn with_username_prompt(mut self, ask: impl Fn() -> Option<String> + 'a) -> Self {
        self.ask_username = Some(Box::new(ask));
        self
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    fn check_root(&self) -> Result<&Path, BatchError> {
        let root = self.settings.root.as_path();
        if root.as_os_str().is_empty() {
            return Err(BatchError::NoRoot);
        }
        if !root.is_dir() {
            return Err(BatchError::RootMissing(root.to_path_buf()));
        }
        Ok(root)
    }

    fn check_user(&self, root: &Path, username: &str) -> Result<(), BatchError> {
        let user = user_folder(root, username);
        if !user.is_dir() {
            return Err(BatchError::UserFolderMissing(user));
        }
        Ok(())
    }

    fn resolve_username(&self, given: Option<String>, session: Option<&Session>) -> Result<String, BatchError> {
        given
            .filter(|u| !u.trim().is_empty())
            .or_else(|| session.and_then(|s| s.as_ref().ok()).and_then(|s| s.username()))
            .or_else(|| self.ask_username.as_ref().and_then(|ask| ask()))
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(BatchError::MissingUsername)
    }

    /// One connection attempt for the whole batch.
    fn open_session(&self, host: Option<&str>, username: Option<&str>) -> Session {
        let Some(host) = host else {
            return Err("no remote host configured (use --host or remote.host)".to_string());
        };
        match self.connector.connect(host, username) {
            Ok(store) => {
                info!(host, "remote session established");
                Ok(store)
            }
            Err(e) => {
                warn!(host, error = %e, "remote session unavailable; remote-backed items will fail");
                Err(e.to_string())
            }
        }
    }

    #[instrument(skip_all, fields(images = request.images.len(), overwrite = request.overwrite))]
    pub fn send(&self, request: SendRequest) -> Result<SendSummary, BatchError> {
        let root = self.check_root()?;

        let sources: Vec<_> = request.images.iter().map(ProjectEntry::source).collect();

        let first_remote_host = sources.iter().find_map(|s| match s {
            Ok(ImageSource::Remote { host, .. }) => Some(host.clone()),
            _ => None,
        });
        let host = request.host.clone().or_else(|| self.settings.default_host.clone()).or(first_remote_host);

        let session = sources
            .iter()
            .any(|s| matches!(s, Ok(ImageSource::Remote { .. })))
            .then(|| self.open_session(host.as_deref(), request.username.as_deref()));

        let username = self.resolve_username(request.username.clone(), session.as_ref())?;
        self.check_user(root, &username)?;

        self.progress.begin(request.images.len());
        let mut records = Vec::with_capacity(request.images.len());
        let mut cancelled = false;

        for (entry, source) in request.images.iter().zip(sources) {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.progress.item(&entry.name);

            let record = match source {
                Ok(ImageSource::Local(path)) => send_one(&LocalSender::new(path), root, &username, request.overwrite),
                Ok(ImageSource::Remote { image_id, .. }) => match &session {
                    Some(Ok(store)) => send_one(
                        &RemoteSender::new(store.as_ref(), image_id),
                        root,
                        &username,
                        request.overwrite,
                    ),
                    Some(Err(reason)) => failed_record(entry, BackendKind::Remote, reason),
                    None => failed_record(entry, BackendKind::Remote, "no remote session"),
                },
                Err(e) => {
                    warn!(image = %entry.name, error = %e, "cannot send image");
                    let mut r = TransferRecord::pending(entry.uri.clone(), BackendKind::Local);
                    r.status = TransferStatus::failed(e);
                    r
                }
            };
            records.push(record);
        }
        self.progress.finish();

        let summary = SendSummary { records, username, host, cancelled };
        info!(summary = %summary.headline(), "send finished");
        Ok(summary)
    }

    #[instrument(skip_all, fields(delete_deconvolved = request.delete_deconvolved, delete_raw = request.delete_raw))]
    pub fn retrieve(
        &self,
        request: RetrieveRequest,
        project: &mut dyn ProjectImporter,
    ) -> Result<RetrieveSummary, BatchError> {
        let root = self.check_root()?;
        let username = self.resolve_username(request.username.clone(), None)?;
        self.check_user(root, &username)?;

        let parser = ResultNameParser::new(self.settings.code_length)?;
        let files = discovery::discover(root, &username, &self.settings.result_extension);
        info!(count = files.len(), "results discovered");

        let host = request.host.clone().or_else(|| self.settings.default_host.clone());
        let session = files
            .iter()
            .any(|f| f.backend() == Ok(BackendKind::Remote))
            .then(|| self.open_session(host.as_deref(), Some(&username)));

        self.progress.begin(files.len());
        let mut items = Vec::with_capacity(files.len());
        let mut cancelled = false;

        for file in &files {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.progress.item(&file.path.file_name().unwrap_or_default().to_string_lossy());

            let report = self.retrieve_item(file, &parser, session.as_ref(), &request, project);
            if let Some(reason) = &report.failure {
                warn!(file = %report.file.display(), stage = %report.stage, %reason, "result not retrieved");
            }
            items.push(report);
        }
        self.progress.finish();

        let summary = RetrieveSummary { items, username, host, cancelled };
        info!(summary = %summary.headline(), "retrieve finished");
        Ok(summary)
    }

    fn retrieve_item(
        &self,
        file: &DiscoveredFile,
        parser: &ResultNameParser,
        session: Option<&Session>,
        request: &RetrieveRequest,
        project: &mut dyn ProjectImporter,
    ) -> ItemReport {
        let backend = file.backend().ok();
        let pending = ItemReport::discovered(&file.path, backend);

        let result = match DeconvolutionResult::from_discovered(
            file,
            parser,
            &self.settings.report_suffix,
            &self.settings.log_suffix,
        ) {
            Ok(r) => r,
            Err(ConventionError::UnknownBackend(tag)) => {
                return pending.fail(format!("backend '{tag}' is not supported"));
            }
            Err(e) => return pending.fail(e),
        };

        let mut report = match result.backend {
            BackendKind::Local => retrieve_one(&LocalRetriever::new(self.settings.min_similarity), &result, project),
            BackendKind::Remote => match session {
                Some(Ok(store)) => retrieve_one(&RemoteRetriever::new(store.as_ref()), &result, project),
                Some(Err(reason)) => return pending.fail(format!("remote session unavailable: {reason}")),
                None => return pending.fail("remote session unavailable"),
            },
        };

        if report.is_success() && (request.delete_deconvolved || request.delete_raw) {
            self.cleanup(&result, request, &mut report);
        }
        report
    }

    /// Post-import cleanup. Problems become warnings: the result is already
    /// safe in the project.
    fn cleanup(&self, result: &DeconvolutionResult, request: &RetrieveRequest, report: &mut ItemReport) {
        let mut clean = true;

        if request.delete_deconvolved {
            match cleanup::delete_associated_files(&result.result_file, &result.tag_folder) {
                Ok(done) => info!(files = done.files.len(), folders = done.folders.len(), "deleted deconvolved files"),
                Err(e) => {
                    clean = false;
                    report.warnings.push(format!("deconvolved files kept: {e}"));
                }
            }
        }

        if request.delete_raw {
            match delete_raw(result) {
                Ok(done) => info!(files = done.files.len(), folders = done.folders.len(), "deleted raw files"),
                Err(e) => {
                    clean = false;
                    report.warnings.push(format!("raw files kept: {e}"));
                }
            }
        }

        for w in &report.warnings {
            warn!(file = %result.result_file.display(), "{w}");
        }
        if clean {
            report.stage = ItemStage::CleanedUp;
        }
    }
}

fn delete_raw(result: &DeconvolutionResult) -> Result<cleanup::CleanupReport, CleanupError> {
    let folder = cleanup::raw_counterpart_folder(&result.result_file, &result.tag_folder, result.backend)?;
    let stop_at = result
        .tag_folder
        .parent()
        .and_then(Path::parent)
        .map(|user| user.join(RAW_FOLDER).join(result.backend.folder_name()))
        .ok_or_else(|| CleanupError::MissingFolder(result.tag_folder.clone()))?;
    cleanup::delete_raw_counterparts(&folder, &result.raw_name, &stop_at)
}

fn failed_record(entry: &ProjectEntry, backend: BackendKind, reason: &str) -> TransferRecord {
    let mut record = TransferRecord::pending(entry.uri.clone(), backend);
    record.status = TransferStatus::failed(reason);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::remote::NoRemote;
    use std::fs;
    use tempfile::TempDir;

    fn settings(root: &Path) -> BatchSettings {
        BatchSettings {
            root: root.to_path_buf(),
            code_length: 13,
            result_extension: "ids".into(),
            report_suffix: ".parameters.txt".into(),
            log_suffix: ".log.txt".into(),
            min_similarity: 0.5,
            default_host: None,
        }
    }

    #[test]
    fn test_send_counts_and_headline() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("alice")).unwrap();
        let img = tmp.path().join("SampleA.tif");
        fs::write(&img, b"px").unwrap();

        let orch = TransferOrchestrator::new(settings(tmp.path()), &NoRemote);
        let summary = orch
            .send(SendRequest {
                images: vec![
                    ProjectEntry::new("SampleA", img.display().to_string()),
                    ProjectEntry::new("R", "https://h/webclient/?show=image-7"),
                    ProjectEntry::new("Bad", "s3://bucket/x"),
                ],
                username: Some("alice".into()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(summary.headline(), "1/3 sent, 0/3 skipped, 2/3 failed");
        assert_eq!(summary.host.as_deref(), Some("https://h"));
        assert!(tmp.path().join("alice/Raw/Local/SampleA.tif").is_file());
    }

    #[test]
    fn test_missing_user_folder_aborts_batch() {
        let tmp = TempDir::new().unwrap();
        let orch = TransferOrchestrator::new(settings(tmp.path()), &NoRemote);

        let err = orch
            .send(SendRequest { username: Some("ghost".into()), ..Default::default() })
            .unwrap_err();

        assert!(matches!(err, BatchError::UserFolderMissing(_)));
    }

    #[test]
    fn test_username_prompt_used_last() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("bob")).unwrap();
        let orch =
            TransferOrchestrator::new(settings(tmp.path()), &NoRemote).with_username_prompt(|| Some("bob".into()));

        let summary = orch.send(SendRequest::default()).unwrap();
        assert_eq!(summary.username, "bob");

        let no_prompt = TransferOrchestrator::new(settings(tmp.path()), &NoRemote);
        assert!(matches!(no_prompt.send(SendRequest::default()), Err(BatchError::MissingUsername)));
    }

    #[test]
    fn test_cancel_before_first_item() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("alice")).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let orch = TransferOrchestrator::new(settings(tmp.path()), &NoRemote).with_cancel(cancel);

        let summary = orch
            .send(SendRequest {
                images: vec![ProjectEntry::new("A", "/nope/A.tif")],
                username: Some("alice".into()),
                ..Default::default()
            })
            .unwrap();

        assert!(summary.cancelled);
        assert!(summary.records.is_empty());
    }

    #[test]
    fn test_retrieve_remote_items_fail_without_session_local_proceed() {
        let tmp = TempDir::new().unwrap();
        let dec = tmp.path().join("alice/Deconvolved");
        fs::create_dir_all(dec.join("omero/None/None")).unwrap();
        fs::create_dir_all(dec.join("s3")).unwrap();
        fs::write(dec.join("omero/None/None/R_1234567890123_hrm.ids"), b"x").unwrap();
        fs::write(dec.join("s3/Q_1234567890123_hrm.ids"), b"x").unwrap();

        struct Empty;
        impl ProjectImporter for Empty {
            fn entries(&self) -> &[ProjectEntry] {
                &[]
            }
            fn import_by_uri(
                &mut self,
                _uri: &str,
                _metadata: &crate::core::metadata::KeyValues,
            ) -> Result<Vec<ProjectEntry>, crate::core::project::ImportError> {
                Ok(Vec::new())
            }
        }

        let orch = TransferOrchestrator::new(settings(tmp.path()), &NoRemote);
        let summary = orch
            .retrieve(RetrieveRequest { username: Some("alice".into()), ..Default::default() }, &mut Empty)
            .unwrap();

        assert_eq!(summary.total(), 2);
        assert_eq!(summary.retrieved(), 0);
        let reasons: Vec<_> = summary.failures().filter_map(|i| i.failure.clone()).collect();
        assert!(reasons[0].contains("remote session unavailable"));
        assert!(reasons[1].contains("'s3' is not supported"));
    }
}
