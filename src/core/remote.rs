//! Remote image store boundary (OMERO-like server).
//!
//! Authentication, transport and annotation plumbing live behind these traits;
//! the transfer core only calls the narrow operations below. No call is ever
//! retried here: a failure is reported once and the item moves on.

use std::path::{Path, PathBuf};

use crate::core::convention::ContainerRef;
use crate::core::metadata::KeyValues;

pub type ImageId = i64;
pub type DatasetId = i64;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("cannot establish a session with {host}: {reason}")]
    Session { host: String, reason: String },

    #[error("{kind} {id} does not exist on the remote store")]
    NotFound { kind: &'static str, id: i64 },

    #[error("remote call '{op}' failed: {reason}")]
    Call { op: &'static str, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn call(op: &'static str, reason: impl ToString) -> Self {
        RemoteError::Call { op, reason: reason.to_string() }
    }
}

/// Image as known by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteImage {
    pub id: ImageId,
    pub name: String,
}

/// Entity whose parent container is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEntity {
    /// Parent is a dataset
    Image(ImageId),
    /// Parent is a project
    Dataset(DatasetId),
}

/// One authenticated session, shared by every item of a batch.
pub trait RemoteStore {
    /// Server base URI, e.g. `https://omero.example.org`.
    fn host(&self) -> &str;

    /// Name of the authenticated user, when the session knows it.
    fn username(&self) -> Option<String>;

    fn image(&self, id: ImageId) -> Result<RemoteImage, RemoteError>;

    /// First parent container, `None` for orphans.
    fn parent_container(&self, entity: RemoteEntity) -> Result<Option<ContainerRef>, RemoteError>;

    /// Download the image's original file(s) into `dest_folder`.
    fn download_image(&self, id: ImageId, dest_folder: &Path) -> Result<Vec<PathBuf>, RemoteError>;

    fn upload_image(&self, dataset: DatasetId, path: &Path) -> Result<ImageId, RemoteError>;

    fn dataset(&self, id: DatasetId) -> Result<ContainerRef, RemoteError>;

    fn create_dataset(&self, name: &str) -> Result<ContainerRef, RemoteError>;

    fn list_child_images(&self, dataset: DatasetId) -> Result<Vec<RemoteImage>, RemoteError>;

    /// Attach one key/value annotation set under `namespace`.
    fn attach_key_values(&self, image: ImageId, namespace: &str, values: &KeyValues) -> Result<(), RemoteError>;

    fn attach_file(&self, image: ImageId, file: &Path) -> Result<(), RemoteError>;

    /// Viewer URI the project importer resolves back to this image.
    fn image_uri(&self, id: ImageId) -> String {
        viewer_uri(self.host(), id)
    }
}

/// Opens sessions. The only place authentication happens.
pub trait RemoteConnector {
    fn connect(&self, host: &str, username: Option<&str>) -> Result<Box<dyn RemoteStore>, RemoteError>;
}

/// Connector used when no remote client is compiled in: every attempt fails,
/// so remote-backed items are reported as failed while local ones proceed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemote;

impl RemoteConnector for NoRemote {
    fn connect(&self, host: &str, _username: Option<&str>) -> Result<Box<dyn RemoteStore>, RemoteError> {
        Err(RemoteError::Session {
            host: host.to_string(),
            reason: "no remote store client is available in this build".to_string(),
        })
    }
}

/// `<host>/webclient/?show=image-<id>`
pub fn viewer_uri(host: &str, id: ImageId) -> String {
    format!("{}/webclient/?show=image-{id}", host.trim_end_matches('/'))
}
