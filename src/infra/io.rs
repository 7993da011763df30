//! Share-side file primitives: idempotent directory creation, atomic copies,
//! and sibling lookups by stem.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Create `path` as a single directory level.
///
/// Another client may create the same folder concurrently on the share, so an
/// `AlreadyExists` error is success as long as the path is now a directory.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create every missing level of `path` below `base`, top-down.
///
/// `base` itself must already exist; it is never created here.
pub fn ensure_dirs_below(base: &Path, path: &Path) -> io::Result<PathBuf> {
    if !base.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", base.display()),
        ));
    }

    let rel = path.strip_prefix(base).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not below {}", path.display(), base.display()),
        )
    })?;

    let mut current = base.to_path_buf();
    for component in rel.components() {
        current.push(component);
        ensure_dir(&current)?;
    }

    Ok(current)
}

/// Copy `src` to `dest` through a temp file in the destination folder.
///
/// The destination name only becomes visible once the full content is on
/// disk; a failed copy leaves nothing behind. An existing `dest` is replaced.
pub fn atomic_copy(src: &Path, dest: &Path) -> io::Result<u64> {
    let dir = dest.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent folder", dest.display()),
        )
    })?;

    let mut reader = fs::File::open(src)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    let bytes = io::copy(&mut reader, tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    // Dropping the temp file on error removes it
    tmp.persist(dest).map_err(|e| e.error)?;

    Ok(bytes)
}

/// Copy `src` into `dir`, keeping its file name.
pub fn atomic_copy_into(src: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = src.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", src.display()),
        )
    })?;
    let dest = dir.join(name);
    atomic_copy(src, &dest)?;
    Ok(dest)
}

/// Move every regular file of `from` into `to`, replacing same-named files.
/// Both folders must live on the same filesystem.
pub fn move_files_into(from: &Path, to: &Path) -> io::Result<Vec<PathBuf>> {
    let mut moved = Vec::new();
    for entry in sorted_entries(from)? {
        if !entry.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name() {
            let dest = to.join(name);
            fs::rename(&entry, &dest)?;
            moved.push(dest);
        }
    }
    Ok(moved)
}

/// Directory entries of `dir`, sorted for deterministic processing.
pub fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = fs::read_dir(dir)?
        .map(|res| res.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    out.sort();
    Ok(out)
}

/// True when `dir` exists and holds no entries at all.
pub fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

/// File name up to (not including) the first '.'.
pub fn stem_before_first_dot(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    name.split('.').next().filter(|s| !s.is_empty())
}

/// File name without its final extension.
pub fn stem_before_last_dot(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    match name.rfind('.') {
        Some(0) | None => Some(name),
        Some(i) => Some(&name[..i]),
    }
}

/// Regular files in the same folder as `file` whose names start with `stem`.
/// `file` itself is included when it matches.
pub fn siblings_with_stem(file: &Path, stem: &str) -> io::Result<Vec<PathBuf>> {
    let parent = match file.parent() {
        Some(p) => p,
        None => return Ok(Vec::new()),
    };

    Ok(sorted_entries(parent)?
        .into_iter()
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(stem))
        })
        .collect())
}

/// First sibling of `file` that shares its stem and ends with `suffix`
/// (e.g. `.parameters.txt` next to `X_hrm.ids`).
pub fn find_companion(file: &Path, suffix: &str) -> Option<PathBuf> {
    let stem = stem_before_first_dot(file)?;
    siblings_with_stem(file, stem)
        .ok()?
        .into_iter()
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix))
        })
}

/// Read a text file, replacing invalid UTF-8 rather than failing.
/// Report files written by the deconvolution server are not always UTF-8.
pub fn read_text_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write `contents` to `path` via temp-then-rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
