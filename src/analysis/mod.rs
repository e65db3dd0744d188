// SPDX-License-Identifier: PMPL-1.0-or-later

//! Package analysis
//!
//! Opens the container, extracts manifest/plist metadata, scores it and
//! lists integration points. Side-effect free.

pub mod integration;
pub mod scorer;
pub mod suggestions;

use crate::container::{self, manifest, plist, ContainerReader};
use crate::error::Result;
use crate::registry::sha256_hex;
use crate::types::{AppMetadata, Platform, SecurityFeatures};
use chrono::Utc;
use log::info;

/// Analyze raw package bytes of the declared platform
pub fn analyze(bytes: &[u8], platform: Platform) -> Result<AppMetadata> {
    let package_sha256 = sha256_hex(bytes);
    let mut reader = ContainerReader::open_for(bytes.to_vec(), platform)?;

    let mut metadata = match platform {
        Platform::Apk => extract_android(&mut reader)?,
        Platform::Ios => extract_ios(&mut reader)?,
    };
    metadata.package_sha256 = package_sha256;
    metadata.analyzed_at = Some(Utc::now());
    metadata.integration_points = integration::identify(&metadata);

    info!(
        "{} analysis completed: {} (score {}, {} integration points)",
        platform,
        metadata.identity_key().unwrap_or("unknown"),
        metadata.vulnerability_score(),
        metadata.integration_points.len()
    );
    Ok(metadata)
}

fn extract_android(reader: &mut ContainerReader) -> Result<AppMetadata> {
    let manifest_bytes = reader.read(container::ANDROID_MANIFEST)?;
    let manifest = manifest::parse(&manifest_bytes);

    let mut metadata = AppMetadata {
        platform: Some(Platform::Apk),
        package_name: manifest.package_name,
        version_code: manifest.version_code,
        version_name: manifest.version_name,
        manifest_encoding: manifest.encoding,
        permissions: manifest.permissions,
        activities: manifest.activities,
        services: manifest.services,
        receivers: manifest.receivers,
        providers: manifest.providers,
        ..AppMetadata::default()
    };

    let mut obfuscation_marker = manifest.allows_backup_marker;
    for entry in reader.entries() {
        if entry.is_dir {
            continue;
        }
        let name = entry.name.as_str();
        if name.starts_with("lib/") {
            metadata.native_libraries.push(entry.name.clone());
        } else if name.starts_with("res/") {
            metadata
                .resources
                .insert(entry.name.clone(), entry.resource_entry());
        } else if name == "classes.dex" {
            metadata.has_dex = true;
            metadata.dex_size = entry.size;
        }
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("meta-inf/proguard/") || lower.contains("dexguard") {
            obfuscation_marker = true;
        }
    }

    let features = SecurityFeatures {
        native_code_present: !metadata.native_libraries.is_empty(),
        sensitive_permissions: scorer::sensitive_permissions(&metadata.permissions),
        obfuscation_detected: obfuscation_marker,
        network_permissions: scorer::network_permissions(&metadata.permissions),
    };
    metadata.security = Some(scorer::analyze(features));
    Ok(metadata)
}

fn extract_ios(reader: &mut ContainerReader) -> Result<AppMetadata> {
    let plist_name = reader
        .info_plist_name()
        .ok_or_else(|| crate::error::AssimilateError::ContainerParse("Info.plist missing".into()))?;
    let values = plist::parse(&reader.read(&plist_name)?);
    let app_dir = plist_name.trim_end_matches("Info.plist").to_string();

    let executable = values.get(plist::BUNDLE_EXECUTABLE).cloned();
    let mut metadata = AppMetadata {
        platform: Some(Platform::Ios),
        bundle_id: values.get(plist::BUNDLE_IDENTIFIER).cloned(),
        version_name: values.get(plist::SHORT_VERSION).cloned(),
        version_code: values.get(plist::BUNDLE_VERSION).cloned(),
        app_name: Some(app_dir.trim_end_matches('/').to_string()),
        executable: executable.clone(),
        permissions: plist::capabilities(&values),
        ..AppMetadata::default()
    };

    let executable_entry = executable.map(|exe| format!("{}{}", app_dir, exe));
    let mut native_code = false;
    for entry in reader.entries() {
        let name = entry.name.as_str();
        if let Some(idx) = name.find(".framework/") {
            let framework = &name[..idx + ".framework".len()];
            if !metadata.frameworks.iter().any(|f| f == framework) {
                metadata.frameworks.push(framework.to_string());
            }
            native_code = true;
        }
        if executable_entry.as_deref() == Some(name) || name.ends_with(".dylib") {
            native_code = true;
        }
        if !entry.is_dir && name.starts_with("Payload/") {
            metadata
                .resources
                .insert(entry.name.clone(), entry.resource_entry());
        }
    }

    let features = SecurityFeatures {
        native_code_present: native_code,
        sensitive_permissions: scorer::sensitive_permissions(&metadata.permissions),
        // Bitcode/symbol stripping is not observable without parsing Mach-O.
        obfuscation_detected: false,
        network_permissions: scorer::network_permissions(&metadata.permissions),
    };
    metadata.security = Some(scorer::analyze(features));
    Ok(metadata)
}
