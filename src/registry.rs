// SPDX-License-Identifier: PMPL-1.0-or-later

//! Binary registry: where original and instrumented artifacts live
//!
//! Layout: `<root>/<app id>/g<generation>/original.<ext>` and
//! `.../instrumented.apk`. Files are written to a temporary sibling and
//! renamed, so a recorded path never points at a partial file. Uploads are
//! written under `<root>/.staging` first; placing one is a rename.

use crate::error::{AssimilateError, Result};
use crate::types::{AssimilatedApp, BinaryRef, Platform};
use log::warn;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const STAGING_DIR: &str = ".staging";

/// A stored artifact and its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBinary {
    pub path: PathBuf,
    pub sha256: String,
}

/// Upload bytes on disk, not yet tied to an app or generation
///
/// Dropping it removes the file.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    sha256: String,
}

impl StagedUpload {
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[derive(Debug, Clone)]
pub struct BinaryRegistry {
    root: PathBuf,
}

impl BinaryRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, app_id: &str, generation: u32) -> PathBuf {
        self.root.join(sanitize(app_id)).join(format!("g{}", generation))
    }

    /// Persist the uploaded package for one generation
    pub fn store_original(
        &self,
        app_id: &str,
        generation: u32,
        platform: Platform,
        bytes: &[u8],
    ) -> Result<StoredBinary> {
        let staged = self.stage_upload(bytes)?;
        self.place_original(staged, app_id, generation, platform)
    }

    /// Write upload bytes to the staging area
    pub fn stage_upload(&self, bytes: &[u8]) -> Result<StagedUpload> {
        let dir = self.root.join(STAGING_DIR);
        fs::create_dir_all(&dir)
            .map_err(|e| AssimilateError::from_io_error(dir.display().to_string(), e))?;
        let mut file = NamedTempFile::new_in(&dir)
            .map_err(|e| AssimilateError::from_io_error(dir.display().to_string(), e))?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| AssimilateError::from_io_error(dir.display().to_string(), e))?;
        Ok(StagedUpload {
            file,
            sha256: sha256_hex(bytes),
        })
    }

    /// Rename a staged upload to `g<generation>/original.<ext>`
    pub fn place_original(
        &self,
        staged: StagedUpload,
        app_id: &str,
        generation: u32,
        platform: Platform,
    ) -> Result<StoredBinary> {
        let dir = self.generation_dir(app_id, generation);
        fs::create_dir_all(&dir)
            .map_err(|e| AssimilateError::from_io_error(dir.display().to_string(), e))?;
        let path = dir.join(format!("original.{}", platform.extension()));
        let StagedUpload { file, sha256 } = staged;
        file.persist(&path)
            .map_err(|e| AssimilateError::from_io_error(path.display().to_string(), e.error))?;
        Ok(StoredBinary { path, sha256 })
    }

    /// Move a signed artifact into place, replacing any previous one
    pub fn commit_instrumented(
        &self,
        app_id: &str,
        generation: u32,
        artifact: &Path,
    ) -> Result<StoredBinary> {
        let dir = self.generation_dir(app_id, generation);
        fs::create_dir_all(&dir)
            .map_err(|e| AssimilateError::from_io_error(dir.display().to_string(), e))?;
        let target = dir.join("instrumented.apk");
        let staging = dir.join(".instrumented.apk.partial");
        fs::copy(artifact, &staging)
            .map_err(|e| AssimilateError::from_io_error(staging.display().to_string(), e))?;
        let sha256 = sha256_file(&staging)?;
        fs::rename(&staging, &target)
            .map_err(|e| AssimilateError::from_io_error(target.display().to_string(), e))?;
        Ok(StoredBinary {
            path: target,
            sha256,
        })
    }

    /// Drop a committed artifact that never made it into the record
    ///
    /// Empty generation and app directories are pruned as well.
    pub fn discard_instrumented(&self, app_id: &str, generation: u32) {
        let dir = self.generation_dir(app_id, generation);
        let target = dir.join("instrumented.apk");
        if let Err(e) = fs::remove_file(&target) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove {}: {}", target.display(), e);
            }
        }
        // remove_dir leaves non-empty directories in place
        let _ = fs::remove_dir(&dir);
        let _ = fs::remove_dir(self.root.join(sanitize(app_id)));
    }

    /// Remove every stored generation of an app
    pub fn remove_all(&self, app_id: &str) -> Result<()> {
        let dir = self.root.join(sanitize(app_id));
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AssimilateError::from_io_error(dir.display().to_string(), e)),
        }
    }
}

/// Ownership-gated view of the current artifact
pub fn authorize(app: &AssimilatedApp, requester: &str) -> Result<Option<BinaryRef>> {
    if !app.is_owned_by(requester) {
        return Err(AssimilateError::AccessDenied {
            app_id: app.id.clone(),
            requester: requester.to_string(),
        });
    }
    let Some(path) = app.binary_path.clone() else {
        return Ok(None);
    };
    if !path.is_file() {
        return Ok(None);
    }
    let instrumented = app.chaos_instrumented && app.instrumented_apk_sha256.is_some();
    let sha256 = if instrumented {
        app.instrumented_apk_sha256.clone()
    } else {
        app.original_apk_sha256.clone()
    };
    Ok(Some(BinaryRef {
        path,
        binary_type: app.binary_type.unwrap_or(app.platform),
        sha256,
        instrumented,
    }))
}

/// Read an artifact and check it against its recorded hash
pub fn read_verified(binary: &BinaryRef) -> Result<Vec<u8>> {
    let bytes = fs::read(&binary.path)
        .map_err(|e| AssimilateError::from_io_error(binary.path.display().to_string(), e))?;
    if let Some(expected) = &binary.sha256 {
        let actual = sha256_hex(&bytes);
        if &actual != expected {
            return Err(AssimilateError::IntegrityMismatch {
                path: binary.path.display().to_string(),
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(bytes)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).map_err(|e| AssimilateError::from_io_error(path.display().to_string(), e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| AssimilateError::from_io_error(path.display().to_string(), e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| AssimilateError::from_io_error(dir.display().to_string(), e))?;
    let mut staging = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| AssimilateError::from_io_error(dir.display().to_string(), e))?;
    staging
        .write_all(bytes)
        .and_then(|_| staging.flush())
        .map_err(|e| AssimilateError::from_io_error(path.display().to_string(), e))?;
    staging
        .persist(path)
        .map_err(|e| AssimilateError::from_io_error(path.display().to_string(), e.error))?;
    Ok(())
}

fn sanitize(app_id: &str) -> String {
    app_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppMetadata;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn stores_original_per_generation() {
        let dir = TempDir::new().unwrap();
        let registry = BinaryRegistry::new(dir.path());
        let first = registry.store_original("app_1", 0, Platform::Apk, b"v1").unwrap();
        let second = registry.store_original("app_1", 1, Platform::Apk, b"v2").unwrap();
        assert_ne!(first.path, second.path);
        assert_eq!(fs::read(&first.path).unwrap(), b"v1");
        assert_eq!(first.sha256, sha256_hex(b"v1"));
    }

    #[test]
    fn commit_replaces_previous_artifact() {
        let dir = TempDir::new().unwrap();
        let registry = BinaryRegistry::new(dir.path().join("bin"));
        let artifact = dir.path().join("signed.apk");
        fs::write(&artifact, b"signed-1").unwrap();
        registry.commit_instrumented("a", 0, &artifact).unwrap();
        fs::write(&artifact, b"signed-2").unwrap();
        let stored = registry.commit_instrumented("a", 0, &artifact).unwrap();
        assert_eq!(fs::read(&stored.path).unwrap(), b"signed-2");
        assert_eq!(stored.sha256, sha256_hex(b"signed-2"));
    }

    #[test]
    fn staged_upload_moves_into_generation() {
        let dir = TempDir::new().unwrap();
        let registry = BinaryRegistry::new(dir.path());
        let staged = registry.stage_upload(b"upload").unwrap();
        let staged_path = staged.path().to_path_buf();
        assert!(staged_path.starts_with(dir.path().join(STAGING_DIR)));
        assert_eq!(staged.sha256(), sha256_hex(b"upload"));

        let stored = registry.place_original(staged, "app_1", 2, Platform::Ios).unwrap();
        assert!(!staged_path.exists());
        assert_eq!(stored.path, dir.path().join("app_1").join("g2").join("original.ipa"));
        assert_eq!(fs::read(&stored.path).unwrap(), b"upload");
        assert_eq!(stored.sha256, sha256_hex(b"upload"));
    }

    #[test]
    fn dropped_staged_upload_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let registry = BinaryRegistry::new(dir.path());
        let staged = registry.stage_upload(b"abandoned").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.is_file());
        drop(staged);
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count(), 0);
    }

    #[test]
    fn discarding_artifact_prunes_empty_directories() {
        let dir = TempDir::new().unwrap();
        let registry = BinaryRegistry::new(dir.path().join("bin"));
        let artifact = dir.path().join("signed.apk");
        fs::write(&artifact, b"signed").unwrap();

        let stored = registry.commit_instrumented("fresh", 0, &artifact).unwrap();
        registry.discard_instrumented("fresh", 0);
        assert!(!stored.path.exists());
        assert!(!dir.path().join("bin").join("fresh").exists());

        let original = registry.store_original("kept", 0, Platform::Apk, b"v1").unwrap();
        let stored = registry.commit_instrumented("kept", 0, &artifact).unwrap();
        registry.discard_instrumented("kept", 0);
        assert!(!stored.path.exists());
        assert!(original.path.is_file());
    }

    #[test]
    fn authorize_checks_owner_and_hash() {
        let dir = TempDir::new().unwrap();
        let registry = BinaryRegistry::new(dir.path());
        let stored = registry.store_original("a", 0, Platform::Apk, b"payload").unwrap();

        let mut app = AssimilatedApp::new("a".into(), "alice", AppMetadata::default(), Utc::now());
        app.binary_path = Some(stored.path.clone());
        app.binary_type = Some(Platform::Apk);
        app.original_apk_sha256 = Some(stored.sha256.clone());

        assert!(matches!(
            authorize(&app, "mallory"),
            Err(AssimilateError::AccessDenied { .. })
        ));
        let binary = authorize(&app, "alice").unwrap().expect("binary present");
        assert!(!binary.instrumented);
        assert_eq!(read_verified(&binary).unwrap(), b"payload");

        fs::write(&stored.path, b"tampered").unwrap();
        assert!(matches!(
            read_verified(&binary),
            Err(AssimilateError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn sanitizes_path_components() {
        assert_eq!(sanitize("../evil/id"), "___evil_id");
    }
}
