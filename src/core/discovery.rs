//! Find pending deconvolved results under `<root>/<owner>/Deconvolved`.
//!
//! Every folder directly below `Deconvolved` is a backend tag; results are
//! collected at any depth below it. Tags are kept verbatim so that an
//! unsupported tag surfaces later as a per-item failure.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::convention::{BackendKind, ConventionError, decode_deconvolved_folder, deconvolved_root, user_folder};
use crate::infra::io::sorted_entries;
use crate::infra::walk::FileWalker;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("share root {} is not a folder", .0.display())]
    RootMissing(PathBuf),

    #[error("user folder {} does not exist", .0.display())]
    UserMissing(PathBuf),

    #[error("no Deconvolved folder at {}", .0.display())]
    DeconvolvedMissing(PathBuf),

    #[error("invalid result extension '{extension}': {reason}")]
    Pattern { extension: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A result file and the tag folder it was found under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Tag folder name as found on disk ("local", "omero", ...)
    pub tag: String,
    /// `<root>/<owner>/Deconvolved/<tag>`
    pub tag_folder: PathBuf,
}

impl DiscoveredFile {
    pub fn backend(&self) -> Result<BackendKind, ConventionError> {
        decode_deconvolved_folder(&self.tag)
    }
}

/// Walk the owner's Deconvolved tree, sorted by tag then path.
pub fn try_discover(root: &Path, owner: &str, extension: &str) -> Result<Vec<DiscoveredFile>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootMissing(root.to_path_buf()));
    }
    let user = user_folder(root, owner);
    if !user.is_dir() {
        return Err(DiscoveryError::UserMissing(user));
    }
    let deconvolved = deconvolved_root(root, owner);
    if !deconvolved.is_dir() {
        return Err(DiscoveryError::DeconvolvedMissing(deconvolved));
    }

    let walker = FileWalker::for_extension(extension).map_err(|e| DiscoveryError::Pattern {
        extension: extension.to_string(),
        reason: e.to_string(),
    })?;

    let mut found = Vec::new();
    for tag_folder in sorted_entries(&deconvolved)? {
        if !tag_folder.is_dir() {
            continue;
        }
        let Some(tag) = tag_folder.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if tag.starts_with('.') {
            continue;
        }

        let files = walker.walk_files(&tag_folder);
        debug!(%tag, count = files.len(), "scanned tag folder");

        found.extend(files.into_iter().map(|path| DiscoveredFile {
            path,
            tag: tag.clone(),
            tag_folder: tag_folder.clone(),
        }));
    }

    Ok(found)
}

/// Like [`try_discover`], but a missing folder is a warning and yields an
/// empty list.
pub fn discover(root: &Path, owner: &str, extension: &str) -> Vec<DiscoveredFile> {
    match try_discover(root, owner, extension) {
        Ok(files) => files,
        Err(e) => {
            warn!(error = %e, "nothing to retrieve");
            Vec::new()
        }
    }
}
