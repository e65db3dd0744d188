// SPDX-License-Identifier: PMPL-1.0-or-later

//! Environment-style configuration for the service and the orchestrator

use log::warn;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "assimilation-data";
pub const SNAPSHOT_FILE: &str = "assimilated_apps.json";
pub const DATABASE_FILE: &str = "assimilated_apps.sqlite3";
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 2;
pub const DEFAULT_APKTOOL_JAR_URL: &str =
    "https://github.com/iBotPeaches/Apktool/releases/download/v2.9.3/apktool_2.9.3.jar";
pub const DEFAULT_UBER_APK_SIGNER_URL: &str =
    "https://github.com/patrickfav/uber-apk-signer/releases/download/v1.3.0/uber-apk-signer-1.3.0.jar";

/// Credentials for the apksigner path
#[derive(Clone, PartialEq, Eq)]
pub struct KeystoreConfig {
    pub path: PathBuf,
    pub alias: String,
    pub password: String,
}

impl std::fmt::Debug for KeystoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystoreConfig")
            .field("path", &self.path)
            .field("alias", &self.alias)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct InstrumentConfig {
    /// Master switch (`CHAOS_APK_INSTRUMENT`).
    pub enabled: bool,
    /// Force the tool-less strategy (`CHAOS_TOOLLESS_APK`).
    pub toolless: bool,
    /// Custom splash asset (`CHAOS_SPLASH_IMAGE`).
    pub splash_image: Option<PathBuf>,
    pub keystore: Option<KeystoreConfig>,
    pub apktool_bin: Option<PathBuf>,
    pub apktool_jar: Option<PathBuf>,
    pub zipalign_bin: Option<PathBuf>,
    pub apksigner_bin: Option<PathBuf>,
    pub java_bin: Option<PathBuf>,
    pub java_home: Option<PathBuf>,
    /// `ANDROID_HOME` / `ANDROID_SDK_ROOT`, in lookup order.
    pub sdk_roots: Vec<PathBuf>,
    pub uber_signer_jar: Option<PathBuf>,
    pub apktool_jar_url: String,
    pub uber_signer_url: String,
    /// Captured `PATH` used for all tool lookups.
    pub search_path: Option<OsString>,
    pub work_root: Option<PathBuf>,
    pub tool_timeout: Duration,
    pub download_timeout: Duration,
    pub download_retries: u32,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            toolless: false,
            splash_image: None,
            keystore: None,
            apktool_bin: None,
            apktool_jar: None,
            zipalign_bin: None,
            apksigner_bin: None,
            java_bin: None,
            java_home: None,
            sdk_roots: Vec::new(),
            uber_signer_jar: None,
            apktool_jar_url: DEFAULT_APKTOOL_JAR_URL.to_string(),
            uber_signer_url: DEFAULT_UBER_APK_SIGNER_URL.to_string(),
            search_path: None,
            work_root: None,
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            download_retries: DEFAULT_DOWNLOAD_RETRIES,
        }
    }
}

impl InstrumentConfig {
    pub fn from_env() -> Self {
        let mut config = Self::from_lookup(|key| env::var(key).ok());
        config.search_path = env::var_os("PATH");
        config
    }

    /// Build from an arbitrary key lookup; `search_path` is left unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let path = |key: &str| get(key).map(PathBuf::from);
        let defaults = Self::default();

        let keystore_values = (
            path("CHAOS_APK_KEYSTORE"),
            get("CHAOS_APK_ALIAS"),
            get("CHAOS_APK_KSPASS"),
        );
        let missing = missing_keystore_keys(
            keystore_values.0.is_some(),
            keystore_values.1.is_some(),
            keystore_values.2.is_some(),
        );
        if !missing.is_empty() && missing.len() < 3 {
            warn!(
                "Keystore partially configured, ignoring it (missing {}); runs will sign with uber-apk-signer",
                missing.join(", ")
            );
        }
        let keystore = match keystore_values {
            (Some(path), Some(alias), Some(password)) => Some(KeystoreConfig {
                path,
                alias,
                password,
            }),
            _ => None,
        };

        let sdk_roots = ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
            .iter()
            .filter_map(|key| path(key))
            .collect();

        Self {
            enabled: get("CHAOS_APK_INSTRUMENT")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.enabled),
            toolless: get("CHAOS_TOOLLESS_APK")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            splash_image: path("CHAOS_SPLASH_IMAGE"),
            keystore,
            apktool_bin: path("APKTOOL_BIN"),
            apktool_jar: path("APKTOOL_JAR"),
            zipalign_bin: path("ZIPALIGN_BIN"),
            apksigner_bin: path("APKSIGNER_BIN"),
            java_bin: path("JAVA_BIN"),
            java_home: path("JAVA_HOME"),
            sdk_roots,
            uber_signer_jar: path("CHAOS_UBER_APK_SIGNER_JAR"),
            apktool_jar_url: get("CHAOS_APKTOOL_JAR_URL").unwrap_or(defaults.apktool_jar_url),
            uber_signer_url: get("CHAOS_UBER_APK_SIGNER_URL").unwrap_or(defaults.uber_signer_url),
            search_path: None,
            work_root: path("CHAOS_WORK_DIR"),
            tool_timeout: seconds(get("CHAOS_TOOL_TIMEOUT_SECS"), DEFAULT_TOOL_TIMEOUT_SECS),
            download_timeout: seconds(
                get("CHAOS_DOWNLOAD_TIMEOUT_SECS"),
                DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            ),
            download_retries: get("CHAOS_DOWNLOAD_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DOWNLOAD_RETRIES),
        }
    }
}

/// Where records and binaries live
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    /// `None` disables the relational mirror.
    pub database_path: Option<PathBuf>,
    pub instrument: InstrumentConfig,
}

impl ServiceConfig {
    pub fn new(data_dir: impl Into<PathBuf>, instrument: InstrumentConfig) -> Self {
        let data_dir = data_dir.into();
        Self {
            database_path: Some(data_dir.join(DATABASE_FILE)),
            data_dir,
            instrument,
        }
    }

    pub fn from_env() -> Self {
        let data_dir = env::var("CHAOS_DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let mut config = Self::new(data_dir, InstrumentConfig::from_env());
        match env::var("CHAOS_DATABASE_PATH") {
            Ok(value) if value.eq_ignore_ascii_case("off") => config.database_path = None,
            Ok(value) if !value.trim().is_empty() => {
                config.database_path = Some(PathBuf::from(value))
            }
            _ => {}
        }
        config
    }

    pub fn without_database(mut self) -> Self {
        self.database_path = None;
        self
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    pub fn binaries_dir(&self) -> PathBuf {
        self.data_dir.join("binaries")
    }
}

/// Keystore variables that are unset, in declaration order
fn missing_keystore_keys(path: bool, alias: bool, password: bool) -> Vec<&'static str> {
    [
        ("CHAOS_APK_KEYSTORE", path),
        ("CHAOS_APK_ALIAS", alias),
        ("CHAOS_APK_KSPASS", password),
    ]
    .into_iter()
    .filter(|(_, set)| !set)
    .map(|(key, _)| key)
    .collect()
}

pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn seconds(value: Option<String>, default: u64) -> Duration {
    let secs = value
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}
