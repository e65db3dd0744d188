// SPDX-License-Identifier: PMPL-1.0-or-later

//! Serialization and terminal rendering for CLI output

use crate::types::{AppMetadata, AppStatus, AppSummary, AssimilatedApp};
use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "yaml" | "yml" => Some(OutputFormat::Yaml),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        }
    }

    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<String> {
        match self {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
            OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        }
    }
}

fn status_label(status: AppStatus) -> ColoredString {
    match status {
        AppStatus::Pending => "pending".normal(),
        AppStatus::Running => "running".yellow(),
        AppStatus::Success => "success".green().bold(),
        AppStatus::Error => "error".red().bold(),
    }
}

pub fn print_analysis(metadata: &AppMetadata) {
    println!("\n{}", "=== PACKAGE ANALYSIS ===".bold().cyan());
    println!(
        "  Platform: {}",
        metadata.platform.map(|p| p.as_str()).unwrap_or("unknown")
    );
    println!("  Identity: {}", metadata.identity_key().unwrap_or("unknown"));
    if let Some(version) = &metadata.version_name {
        println!("  Version: {}", version);
    }
    println!("  SHA-256: {}", metadata.package_sha256);
    println!("  Permissions: {}", metadata.permissions.len());
    println!(
        "  Components: {} activities, {} services",
        metadata.activities.len(),
        metadata.services.len()
    );
    if let Some(security) = &metadata.security {
        let score = security.vulnerability_score.to_string();
        let score = if security.vulnerability_score > 70 {
            score.red().bold()
        } else {
            score.normal()
        };
        println!("  Vulnerability score: {}", score);
        println!(
            "  Integration difficulty: {:?}",
            security.integration_difficulty
        );
    }
    println!("  Integration points: {}", metadata.integration_points.len());
}

pub fn print_status(app: &AssimilatedApp) {
    println!("\n{}", format!("=== {} ===", app.display_name()).bold().cyan());
    println!("  Id: {}", app.id);
    println!("  Owner: {}", app.user_id);
    println!("  Status: {}", status_label(app.status));
    println!("  Progress: {}%", app.instrumentation_progress);
    println!(
        "  Instrumented: {}",
        if app.chaos_instrumented { "yes".green() } else { "no".normal() }
    );
    if let Some(signer) = app.signer {
        println!("  Signer: {}", signer.as_str());
    }
    if let Some(path) = &app.binary_path {
        println!("  Binary: {}", path.display());
    }
    if !app.update_history.is_empty() {
        println!("  Updates: {}", app.update_history.len());
    }
    if let Some(error) = &app.last_error {
        println!("  Last error: {}", error.red());
    }
}

pub fn print_summaries(apps: &[AppSummary]) {
    if apps.is_empty() {
        println!("No assimilated apps.");
        return;
    }
    for app in apps {
        println!(
            "  {:40} {:24} {:4} {:>3}% {}",
            app.app_id,
            app.name,
            app.platform.as_str(),
            app.instrumentation_progress,
            status_label(app.status)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_parse_aliases() {
        assert_eq!(OutputFormat::parse("YML"), Some(OutputFormat::Yaml));
        assert_eq!(OutputFormat::parse("toml"), None);
    }

    #[test]
    fn yaml_and_json_agree_on_fields() {
        let metadata = AppMetadata {
            package_name: Some("com.test.app".into()),
            ..AppMetadata::default()
        };
        let json = OutputFormat::Json.serialize(&metadata).unwrap();
        let yaml = OutputFormat::Yaml.serialize(&metadata).unwrap();
        assert!(json.contains("\"package_name\": \"com.test.app\""));
        assert!(yaml.contains("package_name: com.test.app"));
    }
}
