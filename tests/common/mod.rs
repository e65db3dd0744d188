// SPDX-License-Identifier: PMPL-1.0-or-later

//! Shared fixtures: in-memory packages and fake command-line tools

#![allow(dead_code)]

use apk_assimilator::config::{InstrumentConfig, ServiceConfig};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(name.to_string(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn manifest(package: &str, version: &str, permissions: &[&str]) -> String {
    let mut text = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <manifest xmlns:android=\"http://schemas.android.com/apk/res/android\" \
         package=\"{}\" android:versionCode=\"1\" android:versionName=\"{}\">\n",
        package, version
    );
    for permission in permissions {
        text.push_str(&format!(
            "    <uses-permission android:name=\"android.permission.{}\" />\n",
            permission
        ));
    }
    text.push_str(
        "    <application android:label=\"Test\">\n\
         \x20       <activity android:name=\".MainActivity\" />\n\
         \x20   </application>\n\
         </manifest>\n",
    );
    text
}

/// Minimal APK with a plain-text manifest and a dex stub
pub fn apk(package: &str, version: &str, permissions: &[&str]) -> Vec<u8> {
    let manifest = manifest(package, version, permissions);
    zip_bytes(&[
        ("AndroidManifest.xml", manifest.as_bytes()),
        ("classes.dex", b"dex\n035\0"),
        ("res/layout/main.xml", b"<LinearLayout/>"),
    ])
}

pub fn ipa(bundle_id: &str, version: &str) -> Vec<u8> {
    let plist = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\"><dict>\n\
         <key>CFBundleIdentifier</key><string>{}</string>\n\
         <key>CFBundleShortVersionString</key><string>{}</string>\n\
         <key>CFBundleExecutable</key><string>Demo</string>\n\
         </dict></plist>\n",
        bundle_id, version
    );
    zip_bytes(&[
        ("Payload/Demo.app/Info.plist", plist.as_bytes()),
        ("Payload/Demo.app/Demo", b"\xcf\xfa\xed\xfe"),
    ])
}

/// Instrumentation config that never sees the host's tools
pub fn isolated_instrument(bin: &Path) -> InstrumentConfig {
    InstrumentConfig {
        search_path: Some(bin.as_os_str().to_os_string()),
        apktool_jar_url: "http://127.0.0.1:9/apktool.jar".to_string(),
        uber_signer_url: "http://127.0.0.1:9/uber-apk-signer.jar".to_string(),
        download_retries: 0,
        download_timeout: std::time::Duration::from_secs(2),
        tool_timeout: std::time::Duration::from_secs(30),
        ..InstrumentConfig::default()
    }
}

pub fn service_config(dir: &Path, instrument: InstrumentConfig) -> ServiceConfig {
    ServiceConfig::new(dir.join("data"), instrument)
}

pub fn bin_dir(dir: &Path) -> PathBuf {
    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    bin
}

#[cfg(unix)]
pub fn fake_tool(bin: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = bin.join(name);
    let script = format!("#!/bin/sh\nPATH=/usr/bin:/bin\n{}\n", body);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// `java -jar <uber-apk-signer> -a IN -o OUT --allowResign`
#[cfg(unix)]
pub fn fake_java(bin: &Path) -> PathBuf {
    java_signer(bin, "", "\"$input\"")
}

/// Same as `fake_java`, but sleeps before signing
#[cfg(unix)]
pub fn fake_java_with_delay(bin: &Path, seconds: u32) -> PathBuf {
    java_signer(bin, &format!("sleep {}", seconds), "\"$input\"")
}

/// Emits `source` unchanged instead of the re-packed input
#[cfg(unix)]
pub fn fake_java_emitting(bin: &Path, source: &Path) -> PathBuf {
    java_signer(bin, "", &format!("'{}'", source.display()))
}

#[cfg(unix)]
fn java_signer(bin: &Path, prelude: &str, copy_from: &str) -> PathBuf {
    fake_tool(
        bin,
        "java",
        &format!(
            r#"{}
while [ $# -gt 0 ]; do
  case "$1" in
    -a) input="$2"; shift ;;
    -o) out="$2"; shift ;;
  esac
  shift
done
[ -n "$input" ] || {{ echo "no input" >&2; exit 2; }}
mkdir -p "$out" && cp {} "$out/app-aligned-debugSigned.apk""#,
            prelude, copy_from
        ),
    )
}

/// `apktool d -f -o DIR APK` writes a text manifest;
/// `apktool b DIR -o APK` concatenates the patched sources
#[cfg(unix)]
pub fn fake_apktool(bin: &Path) -> PathBuf {
    fake_tool(
        bin,
        "apktool",
        r#"case "$1" in
  d)
    mkdir -p "$4"
    printf '<manifest package="com.test.app">\n<application android:label="Test">\n</application>\n</manifest>\n' > "$4/AndroidManifest.xml"
    ;;
  b)
    cat "$2/AndroidManifest.xml" "$2/res/values/styles.xml" > "$4"
    ;;
  *) echo "unknown command $1" >&2; exit 1 ;;
esac"#,
    )
}

/// `zipalign -f -p 4 IN OUT`
#[cfg(unix)]
pub fn fake_zipalign(bin: &Path) -> PathBuf {
    fake_tool(bin, "zipalign", r#"cp "$4" "$5""#)
}

/// `apksigner sign ... --out OUT IN`; requires the password in the environment
#[cfg(unix)]
pub fn fake_apksigner(bin: &Path, password: &str) -> PathBuf {
    fake_tool(
        bin,
        "apksigner",
        &format!(
            r#"[ "$CHAOS_APK_KSPASS" = "{}" ] || {{ echo "bad password" >&2; exit 3; }}
while [ $# -gt 1 ]; do
  case "$1" in
    --out) out="$2"; shift ;;
  esac
  shift
done
cp "$1" "$out" && printf 'signed' >> "$out""#,
            password
        ),
    )
}
