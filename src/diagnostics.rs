// SPDX-License-Identifier: PMPL-1.0-or-later

//! Self-diagnostics: which instrumentation path would a run take right now

use crate::config::ServiceConfig;
use crate::instrument::tools::Toolbox;
use crate::storage::JsonSnapshot;
use anyhow::{anyhow, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

pub fn run_self_diagnostics(config: &ServiceConfig) -> Result<()> {
    println!("apk-assimilator self-diagnostics");

    let checks = collect(config);
    println!();
    for entry in &checks {
        entry.print();
    }

    if checks.iter().any(|entry| entry.level == Level::Error) {
        Err(anyhow!("self-diagnostics reported issues"))
    } else {
        Ok(())
    }
}

pub fn collect(config: &ServiceConfig) -> Vec<Diagnostic> {
    let instrument = &config.instrument;
    // Probing never downloads, so the work dir is only nominal here.
    let toolbox = Toolbox::new(instrument, &config.data_dir);

    let mut checks = vec![Diagnostic::ok(
        "version",
        format!("apk-assimilator {}", env!("CARGO_PKG_VERSION")),
    )];
    checks.push(check_directory("data directory", &config.data_dir));
    checks.push(check_snapshot(&JsonSnapshot::new(config.snapshot_path())));
    checks.push(match &config.database_path {
        Some(path) => Diagnostic::ok("database mirror", format!("sqlite at {}", path.display())),
        None => Diagnostic::warning(
            "database mirror",
            "disabled (CHAOS_DATABASE_PATH=off)".to_string(),
        ),
    });

    checks.push(if instrument.enabled {
        Diagnostic::ok("instrumentation", "enabled".to_string())
    } else {
        Diagnostic::warning(
            "instrumentation",
            "disabled (set CHAOS_APK_INSTRUMENT=1 to enable)".to_string(),
        )
    });

    let java = toolbox.java();
    checks.push(match &java {
        Ok(path) => Diagnostic::ok("java", path.display().to_string()),
        Err(_) => Diagnostic::warning(
            "java",
            "not found (JAVA_BIN, JAVA_HOME or PATH); jar fallbacks unavailable".to_string(),
        ),
    });

    checks.push(if instrument.toolless {
        Diagnostic::ok("strategy", "tool-less (CHAOS_TOOLLESS_APK)".to_string())
    } else {
        match toolbox.local_apktool() {
            Ok(Some(launcher)) => Diagnostic::ok(
                "apktool",
                format!("tool-based via {}", launcher.describe()),
            ),
            Ok(None) if java.is_ok() => Diagnostic::warning(
                "apktool",
                format!("will be downloaded from {}", instrument.apktool_jar_url),
            ),
            Ok(None) | Err(_) => Diagnostic::warning(
                "apktool",
                "unavailable; runs use the tool-less strategy".to_string(),
            ),
        }
    });

    checks.push(tool_check("zipalign", toolbox.zipalign().map_err(|e| e.to_string())));
    checks.push(tool_check("apksigner", toolbox.apksigner().map_err(|e| e.to_string())));
    checks.push(check_keystore(config));

    checks.push(match &instrument.uber_signer_jar {
        Some(jar) if jar.is_file() => Diagnostic::ok("uber-apk-signer", jar.display().to_string()),
        Some(jar) => Diagnostic::error(
            "uber-apk-signer",
            format!("{} missing (CHAOS_UBER_APK_SIGNER_JAR)", jar.display()),
        ),
        None => Diagnostic::ok(
            "uber-apk-signer",
            format!("downloaded on demand from {}", instrument.uber_signer_url),
        ),
    });

    checks.push(match &instrument.splash_image {
        Some(path) if path.is_file() => Diagnostic::ok("splash image", path.display().to_string()),
        Some(path) => Diagnostic::error(
            "splash image",
            format!("{} missing (CHAOS_SPLASH_IMAGE)", path.display()),
        ),
        None => Diagnostic::ok("splash image", "built-in placeholder".to_string()),
    });

    checks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub label: &'static str,
    pub level: Level,
    pub detail: String,
}

impl Diagnostic {
    fn new(label: &'static str, level: Level, detail: String) -> Self {
        Self {
            label,
            level,
            detail,
        }
    }

    fn ok(label: &'static str, detail: String) -> Self {
        Self::new(label, Level::Ok, detail)
    }

    fn warning(label: &'static str, detail: String) -> Self {
        Self::new(label, Level::Warn, detail)
    }

    fn error(label: &'static str, detail: String) -> Self {
        Self::new(label, Level::Error, detail)
    }

    fn print(&self) {
        let tag = match self.level {
            Level::Ok => "OK".green(),
            Level::Warn => "WARN".yellow(),
            Level::Error => "ERR".red().bold(),
        };
        println!("  [{}] {:18} {}", tag, self.label, self.detail);
    }
}

fn check_directory(label: &'static str, path: &Path) -> Diagnostic {
    if path.is_dir() {
        Diagnostic::ok(label, format!("{} exists", path.display()))
    } else if path.exists() {
        Diagnostic::error(
            label,
            format!("{} exists but is not a directory", path.display()),
        )
    } else {
        Diagnostic::warning(
            label,
            format!("{} missing (created on first upload)", path.display()),
        )
    }
}

fn check_snapshot(snapshot: &JsonSnapshot) -> Diagnostic {
    match snapshot.load() {
        Ok(Some(apps)) => Diagnostic::ok("snapshot", format!("{} records", apps.len())),
        Ok(None) => Diagnostic::warning("snapshot", "not written yet".to_string()),
        Err(e) => Diagnostic::error("snapshot", format!("unreadable: {}", e)),
    }
}

fn tool_check(label: &'static str, found: std::result::Result<std::path::PathBuf, String>) -> Diagnostic {
    match found {
        Ok(path) => Diagnostic::ok(label, path.display().to_string()),
        Err(_) => Diagnostic::warning(label, "not found; signing falls back to uber-apk-signer".to_string()),
    }
}

fn check_keystore(config: &ServiceConfig) -> Diagnostic {
    match &config.instrument.keystore {
        Some(keystore) if keystore.path.is_file() => Diagnostic::ok(
            "keystore",
            format!("{} (alias {})", keystore.path.display(), keystore.alias),
        ),
        Some(keystore) => Diagnostic::error(
            "keystore",
            format!("{} missing (CHAOS_APK_KEYSTORE)", keystore.path.display()),
        ),
        None => Diagnostic::warning(
            "keystore",
            "not configured (CHAOS_APK_KEYSTORE, CHAOS_APK_ALIAS, CHAOS_APK_KSPASS)".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstrumentConfig, KeystoreConfig};
    use tempfile::TempDir;

    fn isolated(dir: &Path) -> ServiceConfig {
        let instrument = InstrumentConfig {
            search_path: Some(dir.join("no-bin").into_os_string()),
            ..InstrumentConfig::default()
        };
        ServiceConfig::new(dir, instrument)
    }

    #[test]
    fn bare_environment_has_no_errors() {
        let dir = TempDir::new().unwrap();
        let checks = collect(&isolated(dir.path()));
        assert!(checks.iter().all(|c| c.level != Level::Error));
        let apktool = checks.iter().find(|c| c.label == "apktool").unwrap();
        assert!(apktool.detail.contains("tool-less"));
    }

    #[test]
    fn missing_keystore_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut config = isolated(dir.path());
        config.instrument.keystore = Some(KeystoreConfig {
            path: dir.path().join("absent.jks"),
            alias: "a".into(),
            password: "p".into(),
        });
        let checks = collect(&config);
        let keystore = checks.iter().find(|c| c.label == "keystore").unwrap();
        assert_eq!(keystore.level, Level::Error);
    }
}
