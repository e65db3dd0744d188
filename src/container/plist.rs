// SPDX-License-Identifier: PMPL-1.0-or-later

//! Info.plist key/value extraction (XML plists only)

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const BUNDLE_IDENTIFIER: &str = "CFBundleIdentifier";
pub const SHORT_VERSION: &str = "CFBundleShortVersionString";
pub const BUNDLE_VERSION: &str = "CFBundleVersion";
pub const BUNDLE_EXECUTABLE: &str = "CFBundleExecutable";

/// Usage-description keys and the capability each one grants
const USAGE_CAPABILITIES: &[(&str, &str)] = &[
    ("NSCameraUsageDescription", "CAMERA"),
    ("NSLocationWhenInUseUsageDescription", "LOCATION"),
    ("NSLocationAlwaysUsageDescription", "LOCATION"),
    ("NSLocationAlwaysAndWhenInUseUsageDescription", "LOCATION"),
    ("NSContactsUsageDescription", "CONTACTS"),
    ("NSMicrophoneUsageDescription", "RECORD_AUDIO"),
    ("NSPhotoLibraryUsageDescription", "READ_MEDIA_IMAGES"),
    ("NSBluetoothAlwaysUsageDescription", "BLUETOOTH"),
    ("NSLocalNetworkUsageDescription", "LOCAL_NETWORK"),
];

/// Flat `<key>…</key><string>…</string>` pairs; binary plists yield nothing
pub fn parse(bytes: &[u8]) -> BTreeMap<String, String> {
    static PAIR: OnceLock<Regex> = OnceLock::new();
    let pair = PAIR.get_or_init(|| {
        Regex::new(r"<key>([^<]+)</key>\s*<string>([^<]*)</string>").unwrap()
    });

    if bytes.starts_with(b"bplist") {
        return BTreeMap::new();
    }
    let text = String::from_utf8_lossy(bytes);
    pair.captures_iter(&text)
        .map(|c| (c[1].trim().to_string(), c[2].trim().to_string()))
        .collect()
}

/// Capability names implied by the usage-description keys present
pub fn capabilities(plist: &BTreeMap<String, String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for (key, capability) in USAGE_CAPABILITIES {
        if plist.contains_key(*key) && !out.iter().any(|c| c == capability) {
            out.push(capability.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
  <key>CFBundleIdentifier</key>
  <string>com.test.ios</string>
  <key>CFBundleShortVersionString</key><string>2.3</string>
  <key>CFBundleExecutable</key><string>Demo</string>
  <key>NSCameraUsageDescription</key><string>Scan codes</string>
  <key>NSLocationWhenInUseUsageDescription</key><string>Maps</string>
  <key>NSLocationAlwaysUsageDescription</key><string>Maps</string>
</dict></plist>"#;

    #[test]
    fn extracts_string_pairs() {
        let plist = parse(PLIST.as_bytes());
        assert_eq!(plist.get(BUNDLE_IDENTIFIER).map(String::as_str), Some("com.test.ios"));
        assert_eq!(plist.get(SHORT_VERSION).map(String::as_str), Some("2.3"));
        assert_eq!(plist.get(BUNDLE_EXECUTABLE).map(String::as_str), Some("Demo"));
    }

    #[test]
    fn maps_usage_keys_once() {
        let plist = parse(PLIST.as_bytes());
        assert_eq!(capabilities(&plist), vec!["CAMERA", "LOCATION"]);
    }

    #[test]
    fn binary_plist_is_skipped() {
        assert!(parse(b"bplist00\x00\x01").is_empty());
    }
}
