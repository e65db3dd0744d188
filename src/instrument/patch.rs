// SPDX-License-Identifier: PMPL-1.0-or-later

//! Asset, style and manifest patching on an unpacked APK tree
//!
//! Used by both strategies: on an apktool-decoded tree the manifest and
//! styles are text; on a plain ZIP extraction the manifest is usually binary
//! XML and is left untouched.

use crate::container::axml;
use crate::error::{AssimilateError, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

pub const SPLASH_DRAWABLE: &str = "chaos_splash";
pub const THEME_NAME: &str = "ChaosSplashTheme";
const SPLASH_RELATIVE: &str = "res/drawable-nodpi/chaos_splash.png";
const STYLES_RELATIVE: &str = "res/values/styles.xml";

/// 1x1 transparent PNG used when no custom splash is configured
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    AlreadyPresent,
    Skipped(&'static str),
}

impl PatchOutcome {
    pub fn describe(&self) -> String {
        match self {
            PatchOutcome::Applied => "applied".to_string(),
            PatchOutcome::AlreadyPresent => "already present".to_string(),
            PatchOutcome::Skipped(reason) => format!("skipped ({})", reason),
        }
    }
}

/// Copy the splash image into the density-independent drawable directory
pub fn inject_splash(root: &Path, custom: Option<&Path>) -> Result<PathBuf> {
    let bytes = match custom {
        Some(path) => fs::read(path).map_err(|e| {
            AssimilateError::stage("asset", format!("splash image {}: {}", path.display(), e))
        })?,
        None => PLACEHOLDER_PNG.to_vec(),
    };
    let target = root.join(SPLASH_RELATIVE);
    write(&target, &bytes)?;
    Ok(target)
}

/// Append the splash theme to `res/values/styles.xml`, creating it if needed
pub fn patch_styles(root: &Path) -> Result<PatchOutcome> {
    let path = root.join(STYLES_RELATIVE);
    let existing = match fs::read(&path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(AssimilateError::from_io_error(path.display().to_string(), e)),
    };

    let content = match existing {
        Some(bytes) if axml::is_binary_xml(&bytes) => {
            return Ok(PatchOutcome::Skipped("compiled styles"))
        }
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<resources>\n</resources>\n".to_string(),
    };
    if content.contains(&format!("name=\"{}\"", THEME_NAME)) {
        return Ok(PatchOutcome::AlreadyPresent);
    }
    let Some(close) = content.rfind("</resources>") else {
        return Err(AssimilateError::stage(
            "styles",
            "styles.xml has no closing </resources> element",
        ));
    };

    let mut patched = String::with_capacity(content.len() + 256);
    patched.push_str(&content[..close]);
    patched.push_str(&style_block());
    patched.push_str(&content[close..]);
    write(&path, patched.as_bytes())?;
    Ok(PatchOutcome::Applied)
}

fn style_block() -> String {
    format!(
        "    <style name=\"{theme}\" parent=\"@android:style/Theme.NoTitleBar\">\n        <item name=\"android:windowBackground\">@drawable/{drawable}</item>\n    </style>\n",
        theme = THEME_NAME,
        drawable = SPLASH_DRAWABLE
    )
}

/// Point the `<application>` element at the splash theme unless it is themed
pub fn patch_manifest(root: &Path) -> Result<PatchOutcome> {
    let path = root.join("AndroidManifest.xml");
    let bytes = fs::read(&path).map_err(|e| {
        AssimilateError::stage("manifest", format!("{}: {}", path.display(), e))
    })?;
    if axml::is_binary_xml(&bytes) {
        return Ok(PatchOutcome::Skipped("binary manifest"));
    }
    let content = String::from_utf8_lossy(&bytes).into_owned();

    let application = Regex::new(r"<application\b[^>]*>").unwrap();
    let Some(tag) = application.find(&content) else {
        return Ok(PatchOutcome::Skipped("no application element"));
    };
    if tag.as_str().contains("android:theme=") {
        return Ok(PatchOutcome::AlreadyPresent);
    }

    let insert_at = tag.start() + "<application".len();
    let mut patched = String::with_capacity(content.len() + 48);
    patched.push_str(&content[..insert_at]);
    patched.push_str(&format!(" android:theme=\"@style/{}\"", THEME_NAME));
    patched.push_str(&content[insert_at..]);
    write(&path, patched.as_bytes())?;
    Ok(PatchOutcome::Applied)
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AssimilateError::from_io_error(parent.display().to_string(), e))?;
    }
    fs::write(path, bytes).map_err(|e| AssimilateError::from_io_error(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.test.app">
    <application android:label="Test">
        <activity android:name=".Main"/>
    </application>
</manifest>
"#;

    #[test]
    fn placeholder_is_png() {
        let dir = TempDir::new().unwrap();
        let path = inject_splash(dir.path(), None).unwrap();
        assert!(fs::read(path).unwrap().starts_with(b"\x89PNG"));
    }

    #[test]
    fn missing_custom_splash_fails_asset_stage() {
        let dir = TempDir::new().unwrap();
        let err = inject_splash(dir.path(), Some(Path::new("/nonexistent/splash.png"))).unwrap_err();
        assert!(err.to_string().contains("asset"));
    }

    #[test]
    fn styles_created_then_idempotent() {
        let dir = TempDir::new().unwrap();
        assert_eq!(patch_styles(dir.path()).unwrap(), PatchOutcome::Applied);
        assert_eq!(patch_styles(dir.path()).unwrap(), PatchOutcome::AlreadyPresent);
        let styles = fs::read_to_string(dir.path().join(STYLES_RELATIVE)).unwrap();
        assert!(styles.contains("@drawable/chaos_splash"));
        assert!(styles.trim_end().ends_with("</resources>"));
    }

    #[test]
    fn styles_block_goes_before_closing_tag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STYLES_RELATIVE);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "<resources>\n    <style name=\"AppTheme\"/>\n</resources>\n").unwrap();
        patch_styles(dir.path()).unwrap();
        let styles = fs::read_to_string(&path).unwrap();
        assert!(styles.find("AppTheme").unwrap() < styles.find(THEME_NAME).unwrap());
    }

    #[test]
    fn manifest_gets_theme_once() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("AndroidManifest.xml"), MANIFEST).unwrap();
        assert_eq!(patch_manifest(dir.path()).unwrap(), PatchOutcome::Applied);
        assert_eq!(patch_manifest(dir.path()).unwrap(), PatchOutcome::AlreadyPresent);
        let manifest = fs::read_to_string(dir.path().join("AndroidManifest.xml")).unwrap();
        assert!(manifest.contains("<application android:theme=\"@style/ChaosSplashTheme\" android:label"));
    }

    #[test]
    fn themed_application_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let themed = MANIFEST.replace("android:label", "android:theme=\"@style/Own\" android:label");
        fs::write(dir.path().join("AndroidManifest.xml"), &themed).unwrap();
        assert_eq!(patch_manifest(dir.path()).unwrap(), PatchOutcome::AlreadyPresent);
        assert_eq!(
            fs::read_to_string(dir.path().join("AndroidManifest.xml")).unwrap(),
            themed
        );
    }

    #[test]
    fn binary_manifest_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("AndroidManifest.xml"),
            crate::container::axml::test_support::binary_manifest(&["android.permission.CAMERA"]),
        )
        .unwrap();
        assert_eq!(
            patch_manifest(dir.path()).unwrap(),
            PatchOutcome::Skipped("binary manifest")
        );
    }
}
