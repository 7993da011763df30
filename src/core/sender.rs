//! Send raw images to the deconvolution share.
//!
//! One sender per image and backend. The destination is resolved first
//! ([`Sender::build_destination_folder`]) and the returned [`Destination`] is
//! the only way to call [`Sender::copy`], so copying into an unresolved
//! folder cannot be expressed.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::core::convention::{BackendKind, RawLocation, encode_raw_destination, user_folder};
use crate::core::remote::{ImageId, RemoteEntity, RemoteError, RemoteStore};
use crate::infra::io::{atomic_copy, ensure_dirs_below, move_files_into};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("share root {} is not a folder", .0.display())]
    ShareRootMissing(PathBuf),

    #[error("user folder {} does not exist; it must be created by the share administrator", .0.display())]
    UserFolderMissing(PathBuf),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Sent,
    Skipped,
    Failed { reason: String },
}

impl TransferStatus {
    pub fn failed(reason: impl ToString) -> Self {
        TransferStatus::Failed { reason: reason.to_string() }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TransferStatus::Failed { .. })
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Pending => f.write_str("pending"),
            TransferStatus::Sent => f.write_str("sent"),
            TransferStatus::Skipped => f.write_str("skipped"),
            TransferStatus::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// One image moved (or not) during a send batch.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    /// Local path or remote URI of the source image
    pub source: String,
    pub backend: BackendKind,
    pub destination: Option<PathBuf>,
    pub status: TransferStatus,
}

impl TransferRecord {
    pub fn pending(source: impl Into<String>, backend: BackendKind) -> Self {
        Self { source: source.into(), backend, destination: None, status: TransferStatus::Pending }
    }
}

/// Existing raw folder on the share, produced by a sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    folder: PathBuf,
}

impl Destination {
    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

pub trait Sender {
    /// Human-readable source, used in transfer records.
    fn source(&self) -> String;

    fn backend(&self) -> BackendKind;

    /// Resolve and create the raw folder for this image under
    /// `<root>/<username>`. Neither the root nor the user folder is created.
    fn build_destination_folder(&self, root: &Path, username: &str) -> Result<Destination, SendError>;

    /// Transfer into `destination`. An existing file is kept unless
    /// `overwrite` is set.
    fn copy(&self, destination: &Destination, overwrite: bool) -> TransferStatus;
}

/// Run one sender end to end and record the outcome.
pub fn send_one(sender: &dyn Sender, root: &Path, username: &str, overwrite: bool) -> TransferRecord {
    let mut record = TransferRecord::pending(sender.source(), sender.backend());

    match sender.build_destination_folder(root, username) {
        Ok(dest) => {
            record.destination = Some(dest.folder().to_path_buf());
            record.status = sender.copy(&dest, overwrite);
        }
        Err(e) => record.status = TransferStatus::failed(e),
    }

    match &record.status {
        TransferStatus::Failed { reason } => warn!(source = %record.source, %reason, "send failed"),
        status => debug!(source = %record.source, %status, "send finished"),
    }
    record
}

/// Create the convention folders for `location`, top-down, below the user
/// folder.
fn prepare_folder(root: &Path, username: &str, location: &RawLocation) -> Result<Destination, SendError> {
    if !root.is_dir() {
        return Err(SendError::ShareRootMissing(root.to_path_buf()));
    }
    let user = user_folder(root, username);
    if !user.is_dir() {
        return Err(SendError::UserFolderMissing(user));
    }

    let folder = encode_raw_destination(root, username, location);
    let folder = ensure_dirs_below(&user, &folder)?;
    Ok(Destination { folder })
}

/// Image stored as a plain file.
#[derive(Debug, Clone)]
pub struct LocalSender {
    source: PathBuf,
}

impl LocalSender {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self { source: source.into() }
    }
}

impl Sender for LocalSender {
    fn source(&self) -> String {
        self.source.display().to_string()
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Local
    }

    fn build_destination_folder(&self, root: &Path, username: &str) -> Result<Destination, SendError> {
        prepare_folder(root, username, &RawLocation::Local)
    }

    fn copy(&self, destination: &Destination, overwrite: bool) -> TransferStatus {
        let Some(name) = self.source.file_name() else {
            return TransferStatus::failed(format!("{} has no file name", self.source.display()));
        };
        let target = destination.folder().join(name);

        if target.exists() && !overwrite {
            return TransferStatus::Skipped;
        }
        if !self.source.is_file() {
            return TransferStatus::failed(format!("source image {} does not exist", self.source.display()));
        }

        match atomic_copy(&self.source, &target) {
            Ok(bytes) => {
                debug!(to = %target.display(), bytes, "copied raw image");
                TransferStatus::Sent
            }
            Err(e) => TransferStatus::failed(format!(
                "cannot copy {} to {}: {e}",
                self.source.display(),
                destination.folder().display()
            )),
        }
    }
}

/// Image held by the remote store, downloaded into the share.
pub struct RemoteSender<'a> {
    store: &'a dyn RemoteStore,
    image: ImageId,
}

impl<'a> RemoteSender<'a> {
    pub fn new(store: &'a dyn RemoteStore, image: ImageId) -> Self {
        Self { store, image }
    }

    /// Dataset and project of the image. Lookup failures are logged and the
    /// level falls back to `None`.
    fn resolve_location(&self) -> RawLocation {
        let dataset = match self.store.parent_container(RemoteEntity::Image(self.image)) {
            Ok(d) => d,
            Err(e) => {
                warn!(image = self.image, error = %e, "cannot get the parent dataset");
                None
            }
        };

        let project = dataset.as_ref().and_then(|d| {
            self.store
                .parent_container(RemoteEntity::Dataset(d.id))
                .unwrap_or_else(|e| {
                    warn!(dataset = d.id, error = %e, "cannot get the parent project");
                    None
                })
        });

        RawLocation::Remote { project, dataset }
    }
}

impl Sender for RemoteSender<'_> {
    fn source(&self) -> String {
        self.store.image_uri(self.image)
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn build_destination_folder(&self, root: &Path, username: &str) -> Result<Destination, SendError> {
        prepare_folder(root, username, &self.resolve_location())
    }

    fn copy(&self, destination: &Destination, overwrite: bool) -> TransferStatus {
        let image = match self.store.image(self.image) {
            Ok(i) => i,
            Err(e) => return TransferStatus::failed(e),
        };

        if destination.folder().join(&image.name).exists() && !overwrite {
            return TransferStatus::Skipped;
        }

        // Download next to the destination, then rename into place
        let staging = match TempDir::new_in(destination.folder()) {
            Ok(t) => t,
            Err(e) => return TransferStatus::failed(e),
        };

        let result = self
            .store
            .download_image(self.image, staging.path())
            .map_err(|e| e.to_string())
            .and_then(|_| move_files_into(staging.path(), destination.folder()).map_err(|e| e.to_string()));

        match result {
            Ok(files) if files.is_empty() => TransferStatus::failed(format!(
                "download of image {} produced no file",
                self.image
            )),
            Ok(files) => {
                debug!(image = self.image, files = files.len(), "downloaded raw image");
                TransferStatus::Sent
            }
            Err(reason) => TransferStatus::failed(format!("cannot download image {}: {reason}", self.image)),
        }
    }
}
