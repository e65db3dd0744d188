// SPDX-License-Identifier: PMPL-1.0-or-later

//! Signing strategies: SDK apksigner with a keystore, or uber-apk-signer

use super::process::{self, ToolCommand, ToolOutput};
use super::tools::Launcher;
use crate::config::KeystoreConfig;
use crate::error::{AssimilateError, Result};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable the keystore password is handed over in
const KEYSTORE_PASSWORD_ENV: &str = "CHAOS_APK_KSPASS";

pub fn zipalign_command(zipalign: &Path, input: &Path, output: &Path) -> ToolCommand {
    ToolCommand::new("zipalign", zipalign)
        .arg("-f")
        .arg("-p")
        .arg("4")
        .path_arg(input)
        .path_arg(output)
}

/// The password never appears on the command line
pub fn apksigner_command(
    apksigner: &Path,
    keystore: &KeystoreConfig,
    input: &Path,
    output: &Path,
) -> ToolCommand {
    ToolCommand::new("apksigner", apksigner)
        .arg("sign")
        .arg("--ks")
        .path_arg(&keystore.path)
        .arg("--ks-key-alias")
        .arg(&keystore.alias)
        .arg("--ks-pass")
        .arg(format!("env:{}", KEYSTORE_PASSWORD_ENV))
        .arg("--out")
        .path_arg(output)
        .path_arg(input)
        .env(KEYSTORE_PASSWORD_ENV, &keystore.password)
}

pub fn sign_with_apksigner(
    apksigner: &Path,
    keystore: &KeystoreConfig,
    input: &Path,
    output: &Path,
    timeout: Duration,
    search_path: Option<&OsStr>,
) -> Result<ToolOutput> {
    let command = apksigner_command(apksigner, keystore, input, output);
    let result = process::run(&command, timeout, search_path).map_err(|e| match e {
        AssimilateError::ToolFailed { stderr_tail, .. } => {
            AssimilateError::Signing(format!("apksigner rejected the artifact: {}", stderr_tail))
        }
        other => other,
    })?;
    if !output.is_file() {
        return Err(AssimilateError::Signing(
            "apksigner exited cleanly but wrote no output".into(),
        ));
    }
    Ok(result)
}

/// Self-aligning debug-key signer; returns the artifact it produced
pub fn sign_with_uber(
    launcher: &Launcher,
    input: &Path,
    out_dir: &Path,
    timeout: Duration,
    search_path: Option<&OsStr>,
) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .map_err(|e| AssimilateError::from_io_error(out_dir.display().to_string(), e))?;
    let command = launcher
        .command("uber-apk-signer")
        .arg("-a")
        .path_arg(input)
        .arg("-o")
        .path_arg(out_dir)
        .arg("--allowResign");
    process::run(&command, timeout, search_path).map_err(|e| match e {
        AssimilateError::ToolFailed { stderr_tail, .. } => {
            AssimilateError::Signing(format!("uber-apk-signer failed: {}", stderr_tail))
        }
        other => other,
    })?;
    first_apk(out_dir)
}

fn first_apk(dir: &Path) -> Result<PathBuf> {
    let mut apks: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| AssimilateError::from_io_error(dir.display().to_string(), e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("apk"))
                    .unwrap_or(false)
        })
        .collect();
    apks.sort();
    apks.into_iter()
        .next()
        .ok_or_else(|| AssimilateError::Signing("uber-apk-signer produced no APK".into()))
}
