// SPDX-License-Identifier: PMPL-1.0-or-later

//! Integration point identification
//!
//! Enumerates candidate injection targets. Read-only: nothing here touches
//! the binary.

use crate::types::{AppMetadata, Difficulty, IntegrationKind, IntegrationPoint, Platform};

pub fn identify(metadata: &AppMetadata) -> Vec<IntegrationPoint> {
    match metadata.platform {
        Some(Platform::Apk) => {
            let activities = metadata.activities.iter().map(|name| IntegrationPoint {
                kind: IntegrationKind::Activity,
                name: name.clone(),
                integration_method: "activity_theme_injection".to_string(),
                difficulty: Difficulty::Medium,
            });
            let services = metadata.services.iter().map(|name| IntegrationPoint {
                kind: IntegrationKind::Service,
                name: name.clone(),
                integration_method: "service_injection".to_string(),
                difficulty: Difficulty::High,
            });
            activities.chain(services).collect()
        }
        Some(Platform::Ios) => vec![IntegrationPoint {
            kind: IntegrationKind::Bundle,
            name: metadata.bundle_id.clone().unwrap_or_default(),
            integration_method: "bundle_injection".to_string(),
            difficulty: Difficulty::High,
        }],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn android_points_follow_components() {
        let metadata = AppMetadata {
            platform: Some(Platform::Apk),
            activities: vec![".Main".into(), ".Settings".into()],
            services: vec![".Sync".into()],
            ..AppMetadata::default()
        };
        let points = identify(&metadata);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].kind, IntegrationKind::Activity);
        assert_eq!(points[0].difficulty, Difficulty::Medium);
        assert_eq!(points[2].kind, IntegrationKind::Service);
        assert_eq!(points[2].difficulty, Difficulty::High);
    }

    #[test]
    fn ios_has_single_bundle_point() {
        let metadata = AppMetadata {
            platform: Some(Platform::Ios),
            bundle_id: Some("com.test.ios".into()),
            ..AppMetadata::default()
        };
        let points = identify(&metadata);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "com.test.ios");
        assert_eq!(points[0].difficulty, Difficulty::High);
    }
}
