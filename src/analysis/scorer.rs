// SPDX-License-Identifier: PMPL-1.0-or-later

//! Security heuristic scorer
//!
//! Weighted additive model over extracted features, clamped to 100.

use crate::types::{Difficulty, SecurityAnalysis, SecurityFeatures};

pub const NATIVE_CODE_WEIGHT: u32 = 30;
pub const SENSITIVE_PERMISSIONS_WEIGHT: u32 = 25;
pub const NO_OBFUSCATION_WEIGHT: u32 = 20;
pub const NETWORK_PERMISSION_WEIGHT: u32 = 15;
/// Sensitive permissions must exceed this count to contribute
pub const SENSITIVE_PERMISSION_THRESHOLD: usize = 3;

const SENSITIVE_MARKERS: &[&str] = &["CAMERA", "LOCATION", "CONTACTS", "SMS", "PHONE"];
const NETWORK_MARKERS: &[&str] = &["INTERNET", "NETWORK"];

/// Pure scoring function: same features, same result
pub fn score(features: &SecurityFeatures) -> (u8, Difficulty) {
    let mut total = 0u32;
    if features.native_code_present {
        total += NATIVE_CODE_WEIGHT;
    }
    if features.sensitive_permissions.len() > SENSITIVE_PERMISSION_THRESHOLD {
        total += SENSITIVE_PERMISSIONS_WEIGHT;
    }
    if !features.obfuscation_detected {
        total += NO_OBFUSCATION_WEIGHT;
    }
    if !features.network_permissions.is_empty() {
        total += NETWORK_PERMISSION_WEIGHT;
    }

    (total.min(100) as u8, difficulty(features))
}

fn difficulty(features: &SecurityFeatures) -> Difficulty {
    if features.native_code_present {
        Difficulty::High
    } else if !features.sensitive_permissions.is_empty() || !features.network_permissions.is_empty()
    {
        Difficulty::Medium
    } else {
        Difficulty::Low
    }
}

pub fn analyze(features: SecurityFeatures) -> SecurityAnalysis {
    let (vulnerability_score, integration_difficulty) = score(&features);
    SecurityAnalysis {
        features,
        vulnerability_score,
        integration_difficulty,
    }
}

pub fn sensitive_permissions(permissions: &[String]) -> Vec<String> {
    permissions
        .iter()
        .filter(|p| SENSITIVE_MARKERS.iter().any(|m| p.contains(m)))
        .cloned()
        .collect()
}

pub fn network_permissions(permissions: &[String]) -> Vec<String> {
    permissions
        .iter()
        .filter(|p| NETWORK_MARKERS.iter().any(|m| p.contains(m)))
        .cloned()
        .collect()
}
