// SPDX-License-Identifier: PMPL-1.0-or-later

//! Dedup/versioning resolver
//!
//! Maps (user, package name | bundle id) to a stable app id. Linear scan over
//! the user's records; fine at the scale of one user's uploads.

use crate::types::{AppMetadata, AssimilatedApp, UpdateEntry};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Existing(String),
    New(String),
}

impl Resolution {
    pub fn id(&self) -> &str {
        match self {
            Resolution::Existing(id) | Resolution::New(id) => id,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Resolution::Existing(_))
    }
}

pub fn resolve(
    apps: &BTreeMap<String, AssimilatedApp>,
    user_id: &str,
    metadata: &AppMetadata,
    now: DateTime<Utc>,
) -> Resolution {
    if let Some(existing) = find_existing(apps, user_id, metadata) {
        return Resolution::Existing(existing);
    }
    let mut id = mint_id(user_id, now);
    while apps.contains_key(&id) {
        id = mint_id(user_id, now);
    }
    Resolution::New(id)
}

fn find_existing(
    apps: &BTreeMap<String, AssimilatedApp>,
    user_id: &str,
    metadata: &AppMetadata,
) -> Option<String> {
    let package = metadata.package_name.as_deref().filter(|p| !p.is_empty());
    let bundle = metadata.bundle_id.as_deref().filter(|b| !b.is_empty());
    if package.is_none() && bundle.is_none() {
        return None;
    }

    apps.values()
        .filter(|app| app.user_id == user_id)
        .find(|app| {
            (package.is_some() && app.package_name.as_deref() == package)
                || (bundle.is_some() && app.bundle_id.as_deref() == bundle)
        })
        .map(|app| app.id.clone())
}

/// `assimilated_<user>_<timestamp>_<4 random bytes>`
pub fn mint_id(user_id: &str, now: DateTime<Utc>) -> String {
    let mut entropy = [0u8; 4];
    if getrandom::getrandom(&mut entropy).is_err() {
        entropy = now.timestamp_subsec_nanos().to_le_bytes();
    }
    let user: String = user_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!(
        "assimilated_{}_{}_{}",
        user,
        now.format("%Y%m%d_%H%M%S"),
        hex::encode(entropy)
    )
}

/// Start a new generation on an existing record from a re-upload
pub fn apply_update(app: &mut AssimilatedApp, metadata: AppMetadata, now: DateTime<Utc>) {
    app.update_history.push(UpdateEntry {
        updated_at: now,
        previous_version: app.version.clone(),
        new_version: metadata.version_name.clone(),
        previous_status: app.status,
        previous_binary_path: app.binary_path.clone(),
        previous_original_sha256: app.original_apk_sha256.clone(),
        previous_instrumented_sha256: app.instrumented_apk_sha256.clone(),
    });
    app.generation += 1;
    app.version = metadata.version_name.clone();
    app.package_name = metadata.package_name.clone().or(app.package_name.take());
    app.bundle_id = metadata.bundle_id.clone().or(app.bundle_id.take());
    app.analysis = metadata;
    app.improvement_suggestions.clear();

    app.status = crate::types::AppStatus::Pending;
    app.instrumentation_progress = 0;
    app.binary_path = None;
    app.binary_type = None;
    app.original_binary_path = None;
    app.original_apk_sha256 = None;
    app.instrumented_apk_sha256 = None;
    app.chaos_instrumented = false;
    app.signer = None;
    app.last_error = None;
    app.started_at = None;
    app.finished_at = None;
}
