// SPDX-License-Identifier: PMPL-1.0-or-later

//! Best-effort AndroidManifest.xml extraction
//!
//! Plain-text manifests are scanned with patterns. Compiled manifests fall
//! back to the string pool, which yields permissions but no component names.

use crate::container::axml;
use crate::types::ManifestEncoding;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AndroidManifest {
    pub encoding: ManifestEncoding,
    pub package_name: Option<String>,
    pub version_code: Option<String>,
    pub version_name: Option<String>,
    pub permissions: Vec<String>,
    pub activities: Vec<String>,
    pub services: Vec<String>,
    pub receivers: Vec<String>,
    pub providers: Vec<String>,
    pub allows_backup_marker: bool,
}

struct ManifestPatterns {
    package: Regex,
    version_code: Regex,
    version_name: Regex,
    permission: Regex,
    activity: Regex,
    service: Regex,
    receiver: Regex,
    provider: Regex,
}

fn patterns() -> &'static ManifestPatterns {
    static PATTERNS: OnceLock<ManifestPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ManifestPatterns {
        package: Regex::new(r#"\bpackage="([^"]+)""#).unwrap(),
        version_code: Regex::new(r#"android:versionCode="([^"]+)""#).unwrap(),
        version_name: Regex::new(r#"android:versionName="([^"]+)""#).unwrap(),
        permission: Regex::new(r#"<uses-permission(?:-sdk-23)?\b[^>]*?android:name="([^"]+)""#)
            .unwrap(),
        activity: Regex::new(r#"<activity(?:-alias)?\b[^>]*?android:name="([^"]+)""#).unwrap(),
        service: Regex::new(r#"<service\b[^>]*?android:name="([^"]+)""#).unwrap(),
        receiver: Regex::new(r#"<receiver\b[^>]*?android:name="([^"]+)""#).unwrap(),
        provider: Regex::new(r#"<provider\b[^>]*?android:name="([^"]+)""#).unwrap(),
    })
}

pub fn parse(bytes: &[u8]) -> AndroidManifest {
    if axml::is_binary_xml(bytes) {
        return parse_binary(bytes);
    }
    parse_text(&decode_text(bytes))
}

/// Decode manifest text honouring a UTF-8/UTF-16 byte order mark
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    match encoding_rs::Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => {
            let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
            text
        }
        None => String::from_utf8_lossy(bytes),
    }
}

pub fn parse_text(text: &str) -> AndroidManifest {
    let p = patterns();
    let first = |re: &Regex| re.captures(text).map(|c| c[1].to_string());
    let all = |re: &Regex| unique(re.captures_iter(text).map(|c| c[1].to_string()));

    AndroidManifest {
        encoding: ManifestEncoding::Text,
        package_name: first(&p.package),
        version_code: first(&p.version_code),
        version_name: first(&p.version_name),
        permissions: all(&p.permission),
        activities: all(&p.activity),
        services: all(&p.service),
        receivers: all(&p.receiver),
        providers: all(&p.provider),
        allows_backup_marker: text.contains("android:allowBackup"),
    }
}

fn parse_binary(bytes: &[u8]) -> AndroidManifest {
    let pool = axml::string_pool(bytes).unwrap_or_default();
    let permissions = unique(
        pool.iter()
            .filter(|s| s.contains(".permission.") && !s.contains(' '))
            .cloned(),
    );
    AndroidManifest {
        encoding: ManifestEncoding::Binary,
        permissions,
        allows_backup_marker: pool.iter().any(|s| s == "allowBackup"),
        ..AndroidManifest::default()
    }
}

fn unique<I: Iterator<Item = String>>(items: I) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::axml::test_support::binary_manifest;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="com.test.app" android:versionCode="7" android:versionName="1.0.0">
    <uses-permission android:name="android.permission.INTERNET" />
    <uses-permission android:name="android.permission.CAMERA" />
    <uses-permission android:name="android.permission.CAMERA" />
    <application android:label="Test" android:allowBackup="true">
        <activity android:name=".MainActivity" android:exported="true" />
        <activity android:exported="false" android:name=".SettingsActivity" />
        <service android:name=".SyncService" />
        <receiver android:name=".BootReceiver" />
        <provider android:authorities="x" android:name=".DataProvider" />
    </application>
</manifest>"#;

    #[test]
    fn parses_plain_text_manifest() {
        let m = parse(MANIFEST.as_bytes());
        assert_eq!(m.encoding, ManifestEncoding::Text);
        assert_eq!(m.package_name.as_deref(), Some("com.test.app"));
        assert_eq!(m.version_code.as_deref(), Some("7"));
        assert_eq!(m.version_name.as_deref(), Some("1.0.0"));
        assert_eq!(
            m.permissions,
            vec!["android.permission.INTERNET", "android.permission.CAMERA"]
        );
        assert_eq!(m.activities, vec![".MainActivity", ".SettingsActivity"]);
        assert_eq!(m.services, vec![".SyncService"]);
        assert_eq!(m.receivers, vec![".BootReceiver"]);
        assert_eq!(m.providers, vec![".DataProvider"]);
        assert!(m.allows_backup_marker);
    }

    #[test]
    fn decodes_utf16_text_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in r#"<manifest package="com.utf16.app"/>"#.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let m = parse(&bytes);
        assert_eq!(m.package_name.as_deref(), Some("com.utf16.app"));
    }

    #[test]
    fn binary_manifest_yields_permissions_only() {
        let bytes = binary_manifest(&[
            "versionCode",
            "android.permission.READ_CONTACTS",
            "com.example.permission.C2D_MESSAGE",
            "com.example.binary",
        ]);
        let m = parse(&bytes);
        assert_eq!(m.encoding, ManifestEncoding::Binary);
        assert_eq!(
            m.permissions,
            vec![
                "android.permission.READ_CONTACTS",
                "com.example.permission.C2D_MESSAGE"
            ]
        );
        assert!(m.package_name.is_none());
        assert!(m.activities.is_empty());
    }
}
