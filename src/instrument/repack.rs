// SPDX-License-Identifier: PMPL-1.0-or-later

//! Plain ZIP extract/re-pack for the tool-less strategy

use crate::error::{AssimilateError, Result};
use log::debug;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Extract every entry; names escaping the destination are rejected
pub fn extract(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .map_err(|e| AssimilateError::from_io_error(archive_path.display().to_string(), e))?;
    let mut archive = ZipArchive::new(file)?;
    fs::create_dir_all(dest)
        .map_err(|e| AssimilateError::from_io_error(dest.display().to_string(), e))?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(AssimilateError::stage(
                "decode",
                format!("entry '{}' escapes the extraction root", entry.name()),
            ));
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| AssimilateError::from_io_error(target.display().to_string(), e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AssimilateError::from_io_error(parent.display().to_string(), e))?;
        }
        let mut out = File::create(&target)
            .map_err(|e| AssimilateError::from_io_error(target.display().to_string(), e))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| AssimilateError::from_io_error(target.display().to_string(), e))?;
        written += 1;
    }
    debug!("extracted {} entries from {}", written, archive_path.display());
    Ok(written)
}

/// Re-pack a tree into a ZIP; old signature files are dropped
pub fn repack(source: &Path, out_path: &Path) -> Result<usize> {
    let out = File::create(out_path)
        .map_err(|e| AssimilateError::from_io_error(out_path.display().to_string(), e))?;
    let mut writer = ZipWriter::new(BufWriter::new(out));
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let mut count = 0;
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| AssimilateError::stage("rebuild", e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| AssimilateError::stage("rebuild", e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if is_signature_entry(&name) {
            continue;
        }

        let options = if must_be_stored(&name) { stored } else { deflated };
        writer.start_file(name.as_str(), options)?;
        let mut input = File::open(entry.path())
            .map_err(|e| AssimilateError::from_io_error(entry.path().display().to_string(), e))?;
        let mut buffer = Vec::new();
        input
            .read_to_end(&mut buffer)
            .map_err(|e| AssimilateError::from_io_error(entry.path().display().to_string(), e))?;
        io::Write::write_all(&mut writer, &buffer)
            .map_err(|e| AssimilateError::from_io_error(out_path.display().to_string(), e))?;
        count += 1;
    }
    writer.finish()?;
    Ok(count)
}

fn is_signature_entry(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    upper.starts_with("META-INF/")
        && (upper.ends_with(".SF")
            || upper.ends_with(".RSA")
            || upper.ends_with(".DSA")
            || upper.ends_with(".EC")
            || upper == "META-INF/MANIFEST.MF")
}

/// The platform maps these directly from the archive; they must not be deflated
fn must_be_stored(name: &str) -> bool {
    name == "resources.arsc" || name.ends_with(".so")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::test_support::zip_bytes;
    use tempfile::TempDir;

    #[test]
    fn extract_then_repack_drops_signatures() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("in.apk");
        fs::write(
            &apk,
            zip_bytes(&[
                ("AndroidManifest.xml", b"<manifest/>"),
                ("resources.arsc", b"arsc"),
                ("lib/arm64-v8a/libx.so", b"elf"),
                ("META-INF/CERT.RSA", b"sig"),
                ("META-INF/MANIFEST.MF", b"mf"),
            ]),
        )
        .unwrap();

        let tree = dir.path().join("tree");
        assert_eq!(extract(&apk, &tree).unwrap(), 5);
        let out = dir.path().join("out.apk");
        assert_eq!(repack(&tree, &out).unwrap(), 3);

        let mut archive = ZipArchive::new(File::open(&out).unwrap()).unwrap();
        assert!(archive.by_name("META-INF/CERT.RSA").is_err());
        let arsc = archive.by_name("resources.arsc").unwrap();
        assert_eq!(arsc.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn traversal_entries_are_rejected() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("evil.apk");
        fs::write(&apk, zip_bytes(&[("../escape.txt", b"x")])).unwrap();
        let err = extract(&apk, &dir.path().join("tree")).unwrap_err();
        assert!(err.to_string().contains("escapes"));
        assert!(!dir.path().join("escape.txt").exists());
    }
}
