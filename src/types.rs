// SPDX-License-Identifier: PMPL-1.0-or-later

//! Core type definitions for apk-assimilator
//!
//! Analysis output (`AppMetadata`), the scorer's inputs and outputs, and the
//! persisted per-app record (`AssimilatedApp`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Number of trailing characters of orchestration output kept on a record
pub const LOG_TAIL_LIMIT: usize = 6000;

/// Declared package platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Apk,
    Ios,
}

impl Platform {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "apk" | "android" => Some(Platform::Apk),
            "ios" | "ipa" | "app" => Some(Platform::Ios),
            _ => None,
        }
    }

    /// Guess from a file name extension (`.apk`, `.ipa`, `.app`)
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = std::path::Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        Self::parse(ext)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Platform::Apk => "apk",
            Platform::Ios => "ipa",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Apk => "apk",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the instrumentation run attached to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Pending => "pending",
            AppStatus::Running => "running",
            AppStatus::Success => "success",
            AppStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AppStatus::Pending),
            "running" => Some(AppStatus::Running),
            "success" => Some(AppStatus::Success),
            "error" => Some(AppStatus::Error),
            _ => None,
        }
    }
}

/// Integration difficulty tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Low,
    Medium,
    High,
}

/// Which signing strategy produced the final artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signer {
    #[serde(rename = "apksigner")]
    Apksigner,
    #[serde(rename = "uber-apk-signer")]
    UberApkSigner,
}

impl Signer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signer::Apksigner => "apksigner",
            Signer::UberApkSigner => "uber-apk-signer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "apksigner" => Some(Signer::Apksigner),
            "uber-apk-signer" => Some(Signer::UberApkSigner),
            _ => None,
        }
    }
}

/// How the manifest bytes were encoded inside the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ManifestEncoding {
    #[default]
    Text,
    Binary,
}

/// Size information for a single archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub size: u64,
    pub compressed_size: u64,
}

/// Features consumed by the security heuristic scorer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFeatures {
    pub native_code_present: bool,
    pub sensitive_permissions: Vec<String>,
    pub obfuscation_detected: bool,
    pub network_permissions: Vec<String>,
}

/// Scorer output merged with the features that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAnalysis {
    #[serde(flatten)]
    pub features: SecurityFeatures,
    pub vulnerability_score: u8,
    pub integration_difficulty: Difficulty,
}

/// Kind of candidate injection target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationKind {
    Activity,
    Service,
    Bundle,
}

/// A candidate location for the asset-injection stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationPoint {
    pub kind: IntegrationKind,
    pub name: String,
    pub integration_method: String,
    pub difficulty: Difficulty,
}

/// Everything the analyzer extracts from one uploaded package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub platform: Option<Platform>,
    pub package_name: Option<String>,
    pub bundle_id: Option<String>,
    pub version_name: Option<String>,
    pub version_code: Option<String>,
    pub app_name: Option<String>,
    pub executable: Option<String>,
    pub manifest_encoding: ManifestEncoding,
    pub permissions: Vec<String>,
    pub activities: Vec<String>,
    pub services: Vec<String>,
    pub receivers: Vec<String>,
    pub providers: Vec<String>,
    pub native_libraries: Vec<String>,
    pub frameworks: Vec<String>,
    pub resources: BTreeMap<String, ResourceEntry>,
    pub has_dex: bool,
    pub dex_size: u64,
    pub package_sha256: String,
    pub security: Option<SecurityAnalysis>,
    pub integration_points: Vec<IntegrationPoint>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl AppMetadata {
    /// Package name (Android) or bundle id (iOS), whichever identifies the app
    pub fn identity_key(&self) -> Option<&str> {
        self.package_name
            .as_deref()
            .or(self.bundle_id.as_deref())
            .filter(|key| !key.is_empty())
    }

    pub fn vulnerability_score(&self) -> u8 {
        self.security
            .as_ref()
            .map(|s| s.vulnerability_score)
            .unwrap_or(0)
    }
}

/// Summary of a generation that was superseded by a re-upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub updated_at: DateTime<Utc>,
    pub previous_version: Option<String>,
    pub new_version: Option<String>,
    pub previous_status: AppStatus,
    pub previous_binary_path: Option<PathBuf>,
    pub previous_original_sha256: Option<String>,
    pub previous_instrumented_sha256: Option<String>,
}

/// An actionable recommendation derived from an analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub title: String,
    pub description: String,
    pub impact: String,
    pub apply_patch: String,
}

/// Audit entry for an applied suggestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedSuggestion {
    #[serde(flatten)]
    pub suggestion: Suggestion,
    pub applied_at: DateTime<Utc>,
}

/// One logical end-user app and the state of its instrumentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssimilatedApp {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub package_name: Option<String>,
    pub bundle_id: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub status: AppStatus,
    pub instrumentation_progress: u8,
    pub binary_path: Option<PathBuf>,
    pub binary_type: Option<Platform>,
    pub original_binary_path: Option<PathBuf>,
    pub original_apk_sha256: Option<String>,
    pub instrumented_apk_sha256: Option<String>,
    pub chaos_instrumented: bool,
    pub signer: Option<Signer>,
    #[serde(default)]
    pub instrumentation_log: String,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub update_history: Vec<UpdateEntry>,
    #[serde(default)]
    pub generation: u32,
    pub analysis: AppMetadata,
    #[serde(default)]
    pub improvement_suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub applied_suggestions: Vec<AppliedSuggestion>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AssimilatedApp {
    pub fn new(id: String, user_id: &str, metadata: AppMetadata, now: DateTime<Utc>) -> Self {
        let platform = metadata.platform.unwrap_or(Platform::Apk);
        Self {
            id,
            user_id: user_id.to_string(),
            platform,
            package_name: metadata.package_name.clone(),
            bundle_id: metadata.bundle_id.clone(),
            version: metadata.version_name.clone(),
            display_name: None,
            status: AppStatus::Pending,
            instrumentation_progress: 0,
            binary_path: None,
            binary_type: None,
            original_binary_path: None,
            original_apk_sha256: None,
            instrumented_apk_sha256: None,
            chaos_instrumented: false,
            signer: None,
            instrumentation_log: String::new(),
            last_error: None,
            update_history: Vec::new(),
            generation: 0,
            analysis: metadata,
            improvement_suggestions: Vec::new(),
            applied_suggestions: Vec::new(),
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Name shown to the owner: override, then package/bundle id
    pub fn display_name(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.package_name.clone().filter(|n| !n.is_empty()))
            .or_else(|| self.bundle_id.clone().filter(|n| !n.is_empty()))
            .unwrap_or_else(|| "Unknown App".to_string())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Append to the orchestration log, keeping only the last `LOG_TAIL_LIMIT` chars
    pub fn append_log(&mut self, line: &str) {
        if !self.instrumentation_log.is_empty() {
            self.instrumentation_log.push('\n');
        }
        self.instrumentation_log.push_str(line);
        truncate_to_tail(&mut self.instrumentation_log, LOG_TAIL_LIMIT);
    }

    pub fn summary(&self) -> AppSummary {
        AppSummary {
            app_id: self.id.clone(),
            name: self.display_name(),
            platform: self.platform,
            status: self.status,
            instrumentation_progress: self.instrumentation_progress,
            chaos_instrumented: self.chaos_instrumented,
            created_at: self.created_at,
        }
    }
}

/// Listing row for an owner's apps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSummary {
    pub app_id: String,
    pub name: String,
    pub platform: Platform,
    pub status: AppStatus,
    pub instrumentation_progress: u8,
    pub chaos_instrumented: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of `assimilate`: the record plus whether it matched an existing app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assimilation {
    pub app: AssimilatedApp,
    pub is_update: bool,
    pub instrumentation_started: bool,
}

/// Path and type of the artifact a caller may download or launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryRef {
    pub path: PathBuf,
    pub binary_type: Platform,
    pub sha256: Option<String>,
    pub instrumented: bool,
}

/// Drop leading characters so at most `limit` chars remain
pub fn truncate_to_tail(text: &mut String, limit: usize) {
    let count = text.chars().count();
    if count <= limit {
        return;
    }
    let skip = count - limit;
    let cut = text
        .char_indices()
        .nth(skip)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    text.drain(..cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses_extensions() {
        assert_eq!(Platform::from_file_name("demo.APK"), Some(Platform::Apk));
        assert_eq!(Platform::from_file_name("demo.ipa"), Some(Platform::Ios));
        assert_eq!(Platform::from_file_name("demo.zip"), None);
    }

    #[test]
    fn log_tail_is_bounded() {
        let mut app = AssimilatedApp::new("a".into(), "u", AppMetadata::default(), Utc::now());
        for i in 0..2000 {
            app.append_log(&format!("line {i} of orchestration output"));
        }
        assert_eq!(app.instrumentation_log.chars().count(), LOG_TAIL_LIMIT);
        assert!(app.instrumentation_log.ends_with("line 1999 of orchestration output"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut text = "ééééé".to_string();
        truncate_to_tail(&mut text, 2);
        assert_eq!(text, "éé");
    }

    #[test]
    fn signer_serializes_with_tool_names() {
        let json = serde_json::to_string(&Signer::UberApkSigner).unwrap();
        assert_eq!(json, "\"uber-apk-signer\"");
    }
}
