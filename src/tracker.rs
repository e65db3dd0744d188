// SPDX-License-Identifier: PMPL-1.0-or-later

//! Progress/state tracker for one instrumentation run
//!
//! The tracker is the only writer of `status`, `instrumentation_progress` and
//! `chaos_instrumented` while a run is active. Every write is bound to the
//! generation the run started from; once a re-upload bumps the generation,
//! further writes from the stale run are dropped.

use crate::error::{AssimilateError, Result};
use crate::registry::StoredBinary;
use crate::storage::AppStore;
use crate::types::{AppStatus, AssimilatedApp, Signer};
use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;

/// Fixed progress milestones, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Checkpoint {
    Start,
    Decoded,
    AssetInjected,
    StylesPatched,
    ManifestPatched,
    Rebuilt,
    Aligned,
    FallbackSigned,
    Finalized,
}

impl Checkpoint {
    pub fn percent(self) -> u8 {
        match self {
            Checkpoint::Start => 5,
            Checkpoint::Decoded => 15,
            Checkpoint::AssetInjected => 30,
            Checkpoint::StylesPatched => 45,
            Checkpoint::ManifestPatched => 55,
            Checkpoint::Rebuilt => 75,
            Checkpoint::Aligned => 90,
            Checkpoint::FallbackSigned => 95,
            Checkpoint::Finalized => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Checkpoint::Start => "start",
            Checkpoint::Decoded => "decoded",
            Checkpoint::AssetInjected => "asset injected",
            Checkpoint::StylesPatched => "styles patched",
            Checkpoint::ManifestPatched => "manifest patched",
            Checkpoint::Rebuilt => "rebuilt",
            Checkpoint::Aligned => "aligned",
            Checkpoint::FallbackSigned => "fallback-signed",
            Checkpoint::Finalized => "finalized",
        }
    }
}

#[derive(Clone)]
pub struct RunTracker {
    store: Arc<AppStore>,
    app_id: String,
    generation: u32,
}

impl RunTracker {
    pub fn new(store: Arc<AppStore>, app_id: impl Into<String>, generation: u32) -> Self {
        Self {
            store,
            app_id: app_id.into(),
            generation,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Current record, if it still belongs to this run's generation
    pub fn snapshot(&self) -> Option<AssimilatedApp> {
        self.store
            .get(&self.app_id)
            .filter(|app| app.generation == self.generation)
    }

    pub fn is_current(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Apply `f` only while the record is still on this generation
    fn write<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut AssimilatedApp),
    {
        let generation = self.generation;
        let applied = match self.store.update(&self.app_id, |app| {
            if app.generation != generation {
                return false;
            }
            f(app);
            true
        }) {
            Ok(applied) => applied,
            // Deleted by its owner mid-run.
            Err(AssimilateError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };
        if !applied {
            debug!(
                "Dropped write for {} generation {} (stale)",
                self.app_id, generation
            );
        }
        Ok(applied)
    }

    /// Mark the run as started: status `running`, progress 5
    pub fn begin(&self) -> Result<bool> {
        self.write(|app| {
            app.status = AppStatus::Running;
            app.instrumentation_progress = Checkpoint::Start.percent();
            app.chaos_instrumented = false;
            app.signer = None;
            app.instrumented_apk_sha256 = None;
            app.last_error = None;
            app.started_at = Some(Utc::now());
            app.finished_at = None;
            app.append_log(&format!(
                "[{}%] instrumentation started (generation {})",
                Checkpoint::Start.percent(),
                app.generation
            ));
        })
    }

    /// Record a checkpoint; progress never moves backwards
    pub fn checkpoint(&self, checkpoint: Checkpoint) -> Result<bool> {
        let percent = checkpoint.percent();
        self.write(|app| {
            if percent > app.instrumentation_progress {
                app.instrumentation_progress = percent;
            }
            app.append_log(&format!("[{}%] {}", percent, checkpoint.label()));
        })
    }

    pub fn log(&self, line: &str) -> Result<bool> {
        self.write(|app| app.append_log(line))
    }

    /// Finalize: one mutation moves the record to `success`
    pub fn succeed(&self, signer: Signer, artifact: &StoredBinary) -> Result<bool> {
        let original = self.snapshot().and_then(|app| app.original_apk_sha256);
        if original.as_deref() == Some(artifact.sha256.as_str()) {
            return Err(AssimilateError::stage(
                "finalize",
                "instrumented artifact is byte-identical to the original",
            ));
        }
        self.write(|app| {
            app.status = AppStatus::Success;
            app.instrumentation_progress = Checkpoint::Finalized.percent();
            app.chaos_instrumented = true;
            app.signer = Some(signer);
            app.binary_path = Some(artifact.path.clone());
            app.binary_type = Some(app.platform);
            app.instrumented_apk_sha256 = Some(artifact.sha256.clone());
            app.last_error = None;
            app.finished_at = Some(Utc::now());
            app.append_log(&format!(
                "[{}%] {} (signed with {})",
                Checkpoint::Finalized.percent(),
                Checkpoint::Finalized.label(),
                signer.as_str()
            ));
        })
    }

    /// Terminal failure; progress keeps the last checkpoint reached
    pub fn fail(&self, error: &AssimilateError) -> Result<bool> {
        let message = error.to_string();
        warn!("Instrumentation of {} failed: {}", self.app_id, message);
        self.write(|app| {
            app.status = AppStatus::Error;
            app.chaos_instrumented = false;
            app.signer = None;
            app.instrumented_apk_sha256 = None;
            app.last_error = Some(message.clone());
            app.finished_at = Some(Utc::now());
            app.append_log(&format!("error ({}): {}", error.kind(), message));
        })
    }
}
