// SPDX-License-Identifier: PMPL-1.0-or-later

//! Container reader for ZIP-based mobile packages (APK / IPA)

pub mod axml;
pub mod manifest;
pub mod plist;

use crate::error::{AssimilateError, Result};
use crate::types::{Platform, ResourceEntry};
use regex::Regex;
use std::io::{Cursor, Read};
use std::sync::OnceLock;
use zip::ZipArchive;

pub const ANDROID_MANIFEST: &str = "AndroidManifest.xml";
/// Largest entry `read` will inflate into memory
pub const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// One entry of the archive's central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub is_dir: bool,
}

impl EntryInfo {
    pub fn resource_entry(&self) -> ResourceEntry {
        ResourceEntry {
            size: self.size,
            compressed_size: self.compressed_size,
        }
    }
}

/// An opened package held in memory
pub struct ContainerReader {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    entries: Vec<EntryInfo>,
}

impl ContainerReader {
    /// Open raw package bytes; fails if they are not a ZIP archive
    pub fn open(bytes: Vec<u8>) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|err| {
            AssimilateError::ContainerParse(format!("not a valid ZIP archive: {}", err))
        })?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index)?;
            entries.push(EntryInfo {
                name: file.name().to_string(),
                size: file.size(),
                compressed_size: file.compressed_size(),
                is_dir: file.is_dir(),
            });
        }

        Ok(Self { archive, entries })
    }

    /// Open and verify the entry the declared platform requires
    pub fn open_for(bytes: Vec<u8>, platform: Platform) -> Result<Self> {
        let reader = Self::open(bytes)?;
        match platform {
            Platform::Apk => {
                if !reader.contains(ANDROID_MANIFEST) {
                    return Err(AssimilateError::ContainerParse(format!(
                        "required entry {} is missing",
                        ANDROID_MANIFEST
                    )));
                }
            }
            Platform::Ios => {
                if reader.info_plist_name().is_none() {
                    return Err(AssimilateError::ContainerParse(
                        "required entry *.app/Info.plist is missing".to_string(),
                    ));
                }
            }
        }
        Ok(reader)
    }

    pub fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn entry(&self, name: &str) -> Option<&EntryInfo> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read a whole entry into memory, at most `MAX_ENTRY_BYTES`
    ///
    /// The declared size only sizes the buffer after it passed the limit;
    /// the actual read is bounded independently of the header.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let file = self.archive.by_name(name).map_err(|err| {
            AssimilateError::ContainerParse(format!("cannot read entry {}: {}", name, err))
        })?;
        let declared = file.size();
        if declared > MAX_ENTRY_BYTES {
            return Err(oversized(name, declared));
        }
        let mut buffer = Vec::with_capacity(declared as usize);
        file.take(MAX_ENTRY_BYTES + 1)
            .read_to_end(&mut buffer)
            .map_err(|err| AssimilateError::from_io_error(name, err))?;
        if buffer.len() as u64 > MAX_ENTRY_BYTES {
            return Err(oversized(name, buffer.len() as u64));
        }
        Ok(buffer)
    }

    /// Top-level `*.app/Info.plist` (optionally under `Payload/`)
    pub fn info_plist_name(&self) -> Option<String> {
        self.entries
            .iter()
            .find(|e| info_plist_regex().is_match(&e.name))
            .map(|e| e.name.clone())
    }
}

fn oversized(name: &str, size: u64) -> AssimilateError {
    AssimilateError::ContainerParse(format!(
        "entry {} is {} bytes, over the {} byte limit",
        name, size, MAX_ENTRY_BYTES
    ))
}

fn info_plist_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:Payload/)?[^/]+\.app/Info\.plist$").unwrap()
    })
}
