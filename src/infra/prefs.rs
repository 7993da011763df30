//! Remembered username/host between runs.
//!
//! Read once when a batch starts and written back only after it completes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::infra::io::write_atomic;

/// Location relative to the working directory.
pub const PREFS_FILE: &str = ".hrmlink/prefs.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Preferences {
    pub fn default_path() -> PathBuf {
        PathBuf::from(PREFS_FILE)
    }

    /// Missing or unreadable files yield empty preferences.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&text) {
            Ok(prefs) => prefs,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring unreadable preferences");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("serialize preferences")?;
        write_atomic(path, &json)
            .with_context(|| format!("write preferences: {}", path.display()))
    }

    /// Remember non-empty values from a finished batch.
    pub fn remember(&mut self, username: Option<&str>, host: Option<&str>) {
        if let Some(u) = username.filter(|u| !u.is_empty()) {
            self.username = Some(u.to_string());
        }
        if let Some(h) = host.filter(|h| !h.is_empty()) {
            self.host = Some(h.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(Preferences::load(&tmp.path().join("nope.json")), Preferences::default());
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".hrmlink/prefs.json");

        let mut prefs = Preferences::default();
        prefs.remember(Some("alice"), Some(""));
        prefs.save(&path).unwrap();

        let back = Preferences::load(&path);
        assert_eq!(back.username.as_deref(), Some("alice"));
        assert_eq!(back.host, None);
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(Preferences::load(&path), Preferences::default());
    }
}
