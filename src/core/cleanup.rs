//! Removal of processed artifacts from the share.
//!
//! Deletion is by name only: files are matched on their stem, then empty
//! folders are pruned bottom-up, at most two levels, and never at or above
//! the backend folder passed as `stop_at`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::core::convention::{
    BackendKind, ConventionError, RAW_FOLDER, enclosing_dataset_folder,
};
use crate::infra::io::{is_empty_dir, sorted_entries, stem_before_first_dot, stem_before_last_dot};

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("folder {} does not exist", .0.display())]
    MissingFolder(PathBuf),

    #[error("cannot delete {}: {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Convention(#[from] ConventionError),
}

/// What a cleanup removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub files: Vec<PathBuf>,
    pub folders: Vec<PathBuf>,
}

/// Delete `result_file` and every sibling sharing its stem (the name without
/// the final extension), then prune emptied folders.
pub fn delete_associated_files(result_file: &Path, stop_at: &Path) -> Result<CleanupReport, CleanupError> {
    let folder = result_file
        .parent()
        .ok_or_else(|| CleanupError::MissingFolder(result_file.to_path_buf()))?;
    let stem = stem_before_last_dot(result_file)
        .ok_or_else(|| CleanupError::MissingFolder(result_file.to_path_buf()))?
        .to_string();

    delete_and_prune(folder, stop_at, |name| name.starts_with(&stem))
}

/// Raw-side mirror of a result's location:
/// `Raw/Local` or `Raw/omero/<project>/<dataset>`.
pub fn raw_counterpart_folder(
    result_file: &Path,
    tag_folder: &Path,
    backend: BackendKind,
) -> Result<PathBuf, CleanupError> {
    let user = tag_folder
        .parent()
        .and_then(Path::parent)
        .ok_or_else(|| CleanupError::MissingFolder(tag_folder.to_path_buf()))?;
    let backend_root = user.join(RAW_FOLDER).join(backend.folder_name());

    match backend {
        BackendKind::Local => Ok(backend_root),
        BackendKind::Remote => {
            let (dataset_dir, _) = enclosing_dataset_folder(result_file, tag_folder)?;
            let rel = dataset_dir
                .strip_prefix(tag_folder)
                .map_err(|_| ConventionError::MissingDatasetFolder(result_file.to_path_buf()))?;
            Ok(backend_root.join(rel))
        }
    }
}

/// Delete raw copies named `raw_name` (any extension) from `raw_folder`.
pub fn delete_raw_counterparts(raw_folder: &Path, raw_name: &str, stop_at: &Path) -> Result<CleanupReport, CleanupError> {
    if !raw_folder.is_dir() {
        return Err(CleanupError::MissingFolder(raw_folder.to_path_buf()));
    }
    delete_and_prune(raw_folder, stop_at, |name| {
        stem_before_first_dot(Path::new(name)) == Some(raw_name)
    })
}

fn delete_and_prune<F>(folder: &Path, stop_at: &Path, matches: F) -> Result<CleanupReport, CleanupError>
where
    F: Fn(&str) -> bool,
{
    let entries = sorted_entries(folder).map_err(|source| CleanupError::Delete {
        path: folder.to_path_buf(),
        source,
    })?;

    let mut report = CleanupReport::default();
    for path in entries {
        let hit = path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(&matches);
        if !hit {
            continue;
        }
        fs::remove_file(&path).map_err(|source| CleanupError::Delete { path: path.clone(), source })?;
        debug!(path = %path.display(), "deleted");
        report.files.push(path);
    }

    // Folder, then its parent: never more, never the backend folder itself
    let mut current = Some(folder);
    for _ in 0..2 {
        let Some(dir) = current else { break };
        if !prunable(dir, stop_at) {
            break;
        }
        fs::remove_dir(dir).map_err(|source| CleanupError::Delete { path: dir.to_path_buf(), source })?;
        info!(path = %dir.display(), "removed empty folder");
        report.folders.push(dir.to_path_buf());
        current = dir.parent();
    }

    Ok(report)
}

fn prunable(dir: &Path, stop_at: &Path) -> bool {
    dir != stop_at && dir.starts_with(stop_at) && is_empty_dir(dir).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(p: &Path) {
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"x").unwrap();
    }

    #[test]
    fn test_deletes_siblings_and_keeps_others() {
        let tmp = TempDir::new().unwrap();
        let tag = tmp.path().join("local");
        let result = tag.join("A_1234567890123_hrm.ids");
        touch(&result);
        touch(&tag.join("A_1234567890123_hrm.parameters.txt"));
        touch(&tag.join("A_1234567890123_hrm.log.txt"));
        touch(&tag.join("B_1234567890123_hrm.ids"));

        let report = delete_associated_files(&result, &tag).unwrap();

        assert_eq!(report.files.len(), 3);
        assert!(report.folders.is_empty());
        assert!(tag.join("B_1234567890123_hrm.ids").exists());
        assert!(tag.is_dir());
    }

    #[test]
    fn test_prunes_parent_but_not_busy_grandparent() {
        let tmp = TempDir::new().unwrap();
        let tag = tmp.path().join("omero");
        let project = tag.join("3_P");
        let result = project.join("51_D/X_1234567890123_hrm.ids");
        touch(&result);
        touch(&project.join("52_Other/Y_1234567890123_hrm.ids"));

        let report = delete_associated_files(&result, &tag).unwrap();

        assert_eq!(report.folders, vec![project.join("51_D")]);
        assert!(project.join("52_Other").is_dir());
    }

    #[test]
    fn test_prunes_two_levels_at_most() {
        let tmp = TempDir::new().unwrap();
        let tag = tmp.path().join("omero");
        let result = tag.join("3_P/51_D/X_1234567890123/X_1234567890123_hrm.ids");
        touch(&result);

        let report = delete_associated_files(&result, &tag).unwrap();

        assert_eq!(report.folders.len(), 2);
        assert!(!tag.join("3_P/51_D").exists());
        assert!(tag.join("3_P").is_dir());
    }

    #[test]
    fn test_never_removes_stop_folder() {
        let tmp = TempDir::new().unwrap();
        let tag = tmp.path().join("local");
        let result = tag.join("A_1234567890123_hrm.ids");
        touch(&result);

        delete_associated_files(&result, &tag).unwrap();

        assert!(tag.is_dir());
    }

    #[test]
    fn test_raw_counterpart_folder() {
        let user = Path::new("/s/alice");
        let tag = user.join("Deconvolved/omero");
        let file = tag.join("3_P/51_D/X_1234567890123_hrm.ids");

        assert_eq!(
            raw_counterpart_folder(&file, &tag, BackendKind::Remote).unwrap(),
            user.join("Raw/omero/3_P/51_D")
        );

        let local_tag = user.join("Deconvolved/local");
        assert_eq!(
            raw_counterpart_folder(&local_tag.join("X_1234567890123_hrm.ids"), &local_tag, BackendKind::Local).unwrap(),
            user.join("Raw/Local")
        );
    }

    #[test]
    fn test_delete_raw_matches_exact_stem() {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("Raw/Local");
        touch(&local.join("SampleA.tif"));
        touch(&local.join("SampleA.companion.ome"));
        touch(&local.join("SampleAB.tif"));

        let report = delete_raw_counterparts(&local, "SampleA", &local).unwrap();

        assert_eq!(report.files.len(), 2);
        assert!(local.join("SampleAB.tif").exists());
        assert!(matches!(
            delete_raw_counterparts(&tmp.path().join("Raw/omero"), "x", &local),
            Err(CleanupError::MissingFolder(_))
        ));
    }
}
