// SPDX-License-Identifier: PMPL-1.0-or-later

//! Improvement suggestions derived from a stored analysis

use crate::types::{AppMetadata, Platform, Suggestion};

const EXTERNAL_STORAGE: &str = "android.permission.WRITE_EXTERNAL_STORAGE";
const OBFUSCATION_SCORE_THRESHOLD: u8 = 70;

pub fn generate(app_id: &str, metadata: &AppMetadata) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    match metadata.platform {
        Some(Platform::Apk) => {
            if metadata.permissions.iter().any(|p| p == EXTERNAL_STORAGE) {
                suggestions.push(Suggestion {
                    id: format!("SUG_{}_perm_ext_storage", app_id),
                    title: "Reduce storage permission scope".to_string(),
                    description: "Use the scoped storage API instead of WRITE_EXTERNAL_STORAGE."
                        .to_string(),
                    impact: "security".to_string(),
                    apply_patch: "android:requestLegacyExternalStorage=\"false\"".to_string(),
                });
            }
            if metadata.vulnerability_score() > OBFUSCATION_SCORE_THRESHOLD {
                suggestions.push(Suggestion {
                    id: format!("SUG_{}_obfuscation", app_id),
                    title: "Enable code obfuscation".to_string(),
                    description: "Add R8/ProGuard rules that obfuscate critical classes."
                        .to_string(),
                    impact: "security".to_string(),
                    apply_patch: "proguard-rules.pro: -repackageclasses ''".to_string(),
                });
            }
        }
        Some(Platform::Ios) => suggestions.push(Suggestion {
            id: format!("SUG_{}_keychain", app_id),
            title: "Use the platform keychain for secrets".to_string(),
            description: "Store tokens in the Keychain and rotate keys regularly.".to_string(),
            impact: "security".to_string(),
            apply_patch: "migrate secrets to Keychain".to_string(),
        }),
        None => {}
    }

    suggestions
}
