//! Filepath: src/infra/walk.rs
//! Recursive file walker for the deconvolution share.
//! - Matches files by extension globs (case-insensitive, e.g. "*.ids")
//! - Ignore files (.gitignore, .ignore) are NOT honoured: the share is not a
//!   source tree and a stray ignore file must never hide a result
//! - Hidden (dot) files and folders are skipped (partial uploads)
//! - Symlinks are never followed
//! - Deterministic ordering for stable tests/CI
//!
//! Backed by ripgrep's `ignore` crate and `globset`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::debug;

/// Share walker keeping only files whose name matches one of the globs.
pub struct FileWalker
{
    /// Compiled set of file-name patterns to keep
    patterns: GlobSet,
}

impl FileWalker
{
    /// Build a walker keeping files whose *name* matches any of `patterns`
    /// (e.g. "*.ids"). An empty pattern list keeps every file.
    pub fn new(patterns: &[String]) -> Result<Self>
    {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns
        {
            builder.add(
                GlobBuilder::new(pattern)
                    .case_insensitive(true)
                    .literal_separator(true)
                    .build()?,
            );
        }

        Ok(Self { patterns: builder.build()? })
    }

    /// Walker for files with the given extension (without the dot).
    pub fn for_extension(extension: &str) -> Result<Self>
    {
        let ext = extension.trim_start_matches('.');
        Self::new(&[format!("*.{ext}")])
    }

    /// Internal: construct a configured WalkBuilder for `root`.
    fn build_walk(
        &self,
        root: &Path,
    ) -> WalkBuilder
    {
        let mut b = WalkBuilder::new(root);

        // Plain directory semantics: no ignore-file rules of any kind.
        // This also resets the hidden policy, so set it afterwards.
        b.standard_filters(false);

        // WalkBuilder::hidden(true) => *skip* dotfiles
        b.hidden(true);
        b.follow_links(false);

        b
    }

    /// Traverse files under `root` and keep the ones matching the patterns.
    /// Returns a **sorted** list of file paths for determinism.
    pub fn walk_files<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Vec<PathBuf>
    {
        let root_path = root.as_ref();
        let walker = self
            .build_walk(root_path)
            .build();

        let mut out: Vec<PathBuf> = walker
            .filter_map(|res| match res
            {
                Ok(entry) => Some(entry),
                Err(e) =>
                {
                    debug!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            // Keep only regular files
            .filter(|entry| {
                entry
                    .file_type()
                    .is_some_and(|ft| ft.is_file())
            })
            .map(|entry| entry.into_path())
            // Match on the file name only; folders never influence the pattern
            .filter(|abs| {
                self.patterns
                    .is_empty()
                    || abs
                        .file_name()
                        .is_some_and(|name| self.patterns.is_match(name))
            })
            .collect();

        // Deterministic order (stable CLI & tests)
        out.sort();

        out
    }
}
