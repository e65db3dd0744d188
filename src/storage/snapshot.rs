// SPDX-License-Identifier: PMPL-1.0-or-later

//! JSON snapshot of every record, keyed by app id

use crate::error::{AssimilateError, Result};
use crate::registry::write_atomically;
use crate::types::AssimilatedApp;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct JsonSnapshot {
    path: PathBuf,
}

impl JsonSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no snapshot has been written yet
    pub fn load(&self) -> Result<Option<BTreeMap<String, AssimilatedApp>>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AssimilateError::from_io_error(
                    self.path.display().to_string(),
                    e,
                ))
            }
        };
        if content.trim().is_empty() {
            return Ok(Some(BTreeMap::new()));
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn render(apps: &BTreeMap<String, AssimilatedApp>) -> Result<String> {
        Ok(serde_json::to_string_pretty(apps)?)
    }

    pub fn write_rendered(&self, payload: &str) -> Result<()> {
        write_atomically(&self.path, payload.as_bytes())
            .map_err(|e| AssimilateError::Persistence(format!("snapshot: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppMetadata;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn missing_snapshot_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let snapshot = JsonSnapshot::new(dir.path().join("apps.json"));
        assert!(snapshot.load().unwrap().is_none());
    }

    #[test]
    fn written_snapshot_reloads() {
        let dir = TempDir::new().unwrap();
        let snapshot = JsonSnapshot::new(dir.path().join("nested/apps.json"));
        let mut apps = BTreeMap::new();
        let app = AssimilatedApp::new("x".into(), "u", AppMetadata::default(), Utc::now());
        apps.insert(app.id.clone(), app);

        snapshot
            .write_rendered(&JsonSnapshot::render(&apps).unwrap())
            .unwrap();
        assert_eq!(snapshot.load().unwrap().unwrap(), apps);
    }

    #[test]
    fn corrupt_snapshot_is_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("apps.json");
        fs::write(&path, "{ not json").unwrap();
        let err = JsonSnapshot::new(path).load().unwrap_err();
        assert_eq!(err.kind(), "persistence");
    }
}
