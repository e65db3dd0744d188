// SPDX-License-Identifier: PMPL-1.0-or-later

//! Assimilation service: the surface collaborators call
//!
//! `assimilate` is the only operation that starts background work. Each run
//! gets its own thread; a per-app single-flight table coalesces uploads that
//! arrive while a run for the same app is still in flight.

use crate::analysis::{self, suggestions};
use crate::config::ServiceConfig;
use crate::dedup::{self, Resolution};
use crate::error::{AssimilateError, Result};
use crate::instrument::{Orchestrator, RunOutcome};
use crate::registry::{self, BinaryRegistry};
use crate::storage::{AppRepository, AppStore, Change, JsonSnapshot, PersistenceHealth, SqliteRepository};
use crate::tracker::RunTracker;
use crate::types::{
    AppMetadata, AppSummary, AppliedSuggestion, AssimilatedApp, Assimilation, BinaryRef,
    Platform, Suggestion,
};
use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Binary reference plus how a client is expected to run it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchInfo {
    pub app_id: String,
    pub name: String,
    pub binary: BinaryRef,
    pub note: String,
}

#[derive(Clone)]
pub struct AssimilationService {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServiceConfig,
    store: Arc<AppStore>,
    registry: BinaryRegistry,
    orchestrator: Orchestrator,
    /// app id -> re-run requested while in flight
    runs: Mutex<HashMap<String, bool>>,
    idle: Condvar,
}

impl AssimilationService {
    /// Open the data directory, snapshot and (optionally) the SQLite mirror
    pub fn open(config: ServiceConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).map_err(|e| {
            AssimilateError::from_io_error(config.data_dir.display().to_string(), e)
        })?;

        let mut mirrors: Vec<Box<dyn AppRepository>> = Vec::new();
        if let Some(path) = &config.database_path {
            match SqliteRepository::open(path) {
                Ok(repo) => mirrors.push(Box::new(repo)),
                Err(e) => warn!("Database mirror disabled ({}): {}", path.display(), e),
            }
        }
        let store = AppStore::open(JsonSnapshot::new(config.snapshot_path()), mirrors);
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: ServiceConfig, store: AppStore) -> Self {
        let registry = BinaryRegistry::new(config.binaries_dir());
        let orchestrator = Orchestrator::new(config.instrument.clone(), registry.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                store: Arc::new(store),
                registry,
                orchestrator,
                runs: Mutex::new(HashMap::new()),
                idle: Condvar::new(),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &AppStore {
        &self.inner.store
    }

    /// Side-effect free analysis of raw package bytes
    pub fn analyze(&self, bytes: &[u8], platform: Platform) -> Result<AppMetadata> {
        analysis::analyze(bytes, platform)
    }

    /// Analysis with the platform given as a string (`apk` / `ios`)
    pub fn analyze_declared(&self, bytes: &[u8], declared: &str) -> Result<AppMetadata> {
        let platform = Platform::parse(declared)
            .ok_or_else(|| AssimilateError::UnsupportedPlatform(declared.to_string()))?;
        self.analyze(bytes, platform)
    }

    /// Create or update the record for an analyzed upload
    ///
    /// `package` must be the bytes `metadata` was produced from; they become
    /// the new generation's original binary. Returns as soon as the record is
    /// stored; instrumentation continues in the background.
    pub fn assimilate(
        &self,
        metadata: AppMetadata,
        user_id: &str,
        package: &[u8],
    ) -> Result<Assimilation> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AssimilateError::InvalidInput("user id is empty".into()));
        }
        let platform = metadata
            .platform
            .ok_or_else(|| AssimilateError::InvalidInput("metadata has no platform".into()))?;
        if !metadata.package_sha256.is_empty()
            && metadata.package_sha256 != registry::sha256_hex(package)
        {
            return Err(AssimilateError::InvalidInput(
                "package bytes do not match the analyzed metadata".into(),
            ));
        }

        let instrument = platform == Platform::Apk && self.inner.config.instrument.enabled;
        let registry = &self.inner.registry;
        let now = Utc::now();

        // Only the rename into the generation directory happens under the store lock.
        let staged = registry.stage_upload(package)?;
        let (app, is_update) = self.inner.store.transact(|apps| {
            let resolution = dedup::resolve(apps, user_id, &metadata, now);
            let generation = match &resolution {
                Resolution::Existing(id) => apps.get(id).map(|app| app.generation + 1).unwrap_or(0),
                Resolution::New(_) => 0,
            };
            let stored = registry.place_original(staged, resolution.id(), generation, platform)?;

            let id = resolution.id().to_string();
            let is_update = resolution.is_update();
            let record = match resolution {
                Resolution::Existing(id) => {
                    let record = apps
                        .get_mut(&id)
                        .ok_or_else(|| AssimilateError::NotFound(id.clone()))?;
                    dedup::apply_update(record, metadata.clone(), now);
                    record
                }
                Resolution::New(id) => apps
                    .entry(id.clone())
                    .or_insert_with(|| AssimilatedApp::new(id, user_id, metadata.clone(), now)),
            };

            record.original_binary_path = Some(stored.path.clone());
            record.binary_path = Some(stored.path);
            record.binary_type = Some(platform);
            record.original_apk_sha256 = Some(stored.sha256);
            record.improvement_suggestions = suggestions::generate(&record.id, &record.analysis);
            if !instrument {
                let reason = if platform == Platform::Ios {
                    "instrumentation not available for iOS packages"
                } else {
                    "instrumentation disabled (CHAOS_APK_INSTRUMENT)"
                };
                record.append_log(reason);
            }
            Ok(((record.clone(), is_update), Change::Upserted(id)))
        })?;

        info!(
            "{} {} for {} (generation {})",
            if is_update { "Updated" } else { "Created" },
            app.id,
            user_id,
            app.generation
        );

        let instrumentation_started = if instrument {
            self.schedule(&app.id)?;
            true
        } else {
            false
        };
        Ok(Assimilation {
            app,
            is_update,
            instrumentation_started,
        })
    }

    /// Current record, if any
    pub fn get_status(&self, app_id: &str) -> Option<AssimilatedApp> {
        self.inner.store.get(app_id)
    }

    /// Current artifact for its owner; `None` if the app or file is absent
    pub fn get_binary(&self, app_id: &str, requester: &str) -> Result<Option<BinaryRef>> {
        match self.inner.store.get(app_id) {
            Some(app) => registry::authorize(&app, requester),
            None => Ok(None),
        }
    }

    /// Artifact bytes, verified against the recorded hash
    pub fn read_verified(&self, app_id: &str, requester: &str) -> Result<Vec<u8>> {
        let binary = self
            .get_binary(app_id, requester)?
            .ok_or_else(|| AssimilateError::NotFound(app_id.to_string()))?;
        registry::read_verified(&binary)
    }

    pub fn launch_info(&self, app_id: &str, requester: &str) -> Result<LaunchInfo> {
        let app = self.owned(app_id, requester)?;
        let binary = registry::authorize(&app, requester)?
            .ok_or_else(|| AssimilateError::NotFound(format!("{} (binary)", app_id)))?;
        let note = match binary.binary_type {
            Platform::Apk => "Install the APK in an Android sandbox or emulator on the client.",
            Platform::Ios => "Sideload the IPA on a development device or simulator on the client.",
        };
        Ok(LaunchInfo {
            app_id: app.id.clone(),
            name: app.display_name(),
            binary,
            note: note.to_string(),
        })
    }

    pub fn list_apps(&self, user_id: &str) -> Vec<AppSummary> {
        self.inner
            .store
            .list_for(user_id)
            .iter()
            .map(AssimilatedApp::summary)
            .collect()
    }

    pub fn rename_app(&self, app_id: &str, requester: &str, name: &str) -> Result<AppSummary> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AssimilateError::InvalidInput("name must not be empty".into()));
        }
        self.owned(app_id, requester)?;
        self.inner.store.update(app_id, |app| {
            app.display_name = Some(name.to_string());
            app.summary()
        })
    }

    /// Owner-authorized hard delete of the record, mirror row and binaries
    pub fn delete_app(&self, app_id: &str, requester: &str) -> Result<AssimilatedApp> {
        self.owned(app_id, requester)?;
        let removed = self.inner.store.remove(app_id)?;
        if let Err(e) = self.inner.registry.remove_all(app_id) {
            warn!("Binaries for {} not removed: {}", app_id, e);
        }
        info!("Deleted {} for {}", app_id, requester);
        Ok(removed)
    }

    pub fn suggestions(&self, app_id: &str, requester: &str) -> Result<Vec<Suggestion>> {
        self.owned(app_id, requester)?;
        self.inner.store.update(app_id, |app| {
            app.improvement_suggestions = suggestions::generate(&app.id, &app.analysis);
            app.improvement_suggestions.clone()
        })
    }

    pub fn apply_suggestion(
        &self,
        app_id: &str,
        requester: &str,
        suggestion_id: &str,
    ) -> Result<AppliedSuggestion> {
        self.owned(app_id, requester)?;
        self.inner.store.transact(|apps| {
            let app = apps
                .get_mut(app_id)
                .ok_or_else(|| AssimilateError::NotFound(app_id.to_string()))?;
            if let Some(applied) = app
                .applied_suggestions
                .iter()
                .find(|a| a.suggestion.id == suggestion_id)
            {
                return Ok((applied.clone(), Change::Unchanged));
            }
            let suggestion = suggestions::generate(&app.id, &app.analysis)
                .into_iter()
                .find(|s| s.id == suggestion_id)
                .ok_or_else(|| AssimilateError::NotFound(suggestion_id.to_string()))?;
            let applied = AppliedSuggestion {
                suggestion,
                applied_at: Utc::now(),
            };
            app.applied_suggestions.push(applied.clone());
            Ok((applied, Change::Upserted(app_id.to_string())))
        })
    }

    pub fn revert_suggestion(&self, app_id: &str, requester: &str, suggestion_id: &str) -> Result<()> {
        self.owned(app_id, requester)?;
        self.inner.store.transact(|apps| {
            let app = apps
                .get_mut(app_id)
                .ok_or_else(|| AssimilateError::NotFound(app_id.to_string()))?;
            let before = app.applied_suggestions.len();
            app.applied_suggestions
                .retain(|a| a.suggestion.id != suggestion_id);
            if app.applied_suggestions.len() == before {
                return Err(AssimilateError::NotFound(suggestion_id.to_string()));
            }
            Ok(((), Change::Upserted(app_id.to_string())))
        })
    }

    pub fn persistence_health(&self) -> PersistenceHealth {
        self.inner.store.health()
    }

    pub fn is_running(&self, app_id: &str) -> bool {
        self.inner
            .runs
            .lock()
            .map(|runs| runs.contains_key(app_id))
            .unwrap_or(false)
    }

    /// Block until no run for `app_id` is in flight; `false` on timeout
    pub fn wait_for_run(&self, app_id: &str, timeout: Duration) -> bool {
        let Ok(runs) = self.inner.runs.lock() else {
            return false;
        };
        match self
            .inner
            .idle
            .wait_timeout_while(runs, timeout, |runs| runs.contains_key(app_id))
        {
            Ok((_, result)) => !result.timed_out(),
            Err(_) => false,
        }
    }

    fn owned(&self, app_id: &str, requester: &str) -> Result<AssimilatedApp> {
        let app = self
            .inner
            .store
            .get(app_id)
            .ok_or_else(|| AssimilateError::NotFound(app_id.to_string()))?;
        if !app.is_owned_by(requester) {
            return Err(AssimilateError::AccessDenied {
                app_id: app_id.to_string(),
                requester: requester.to_string(),
            });
        }
        Ok(app)
    }

    /// Start a worker, or flag a re-run if one is already in flight
    fn schedule(&self, app_id: &str) -> Result<()> {
        {
            let mut runs = self
                .inner
                .runs
                .lock()
                .map_err(|_| AssimilateError::stage("schedule", "run table poisoned"))?;
            if let Some(rerun) = runs.get_mut(app_id) {
                *rerun = true;
                info!("Run for {} in flight; re-run queued", app_id);
                return Ok(());
            }
            runs.insert(app_id.to_string(), false);
        }

        let inner = Arc::clone(&self.inner);
        let id = app_id.to_string();
        let spawned = thread::Builder::new()
            .name(format!("instrument-{}", app_id))
            .spawn(move || inner.worker(id));
        if let Err(e) = spawned {
            self.inner.finish(app_id);
            return Err(AssimilateError::from_io_error("instrumentation thread", e));
        }
        Ok(())
    }
}

impl Inner {
    fn worker(&self, app_id: String) {
        let mut guard = RunGuard {
            inner: self,
            app_id: &app_id,
            armed: true,
        };
        loop {
            let Some(app) = self.store.get(&app_id) else {
                break;
            };
            let tracker = RunTracker::new(Arc::clone(&self.store), app_id.clone(), app.generation);
            match self.orchestrator.run(&tracker) {
                RunOutcome::Succeeded { signer, .. } => {
                    info!("Run for {} succeeded ({})", app_id, signer.as_str())
                }
                RunOutcome::Failed { kind, message, progress } => {
                    error!("Run for {} failed at {}% [{}]: {}", app_id, progress, kind, message)
                }
                RunOutcome::Superseded => info!("Run for {} superseded", app_id),
            }

            let Ok(mut runs) = self.runs.lock() else {
                break;
            };
            match runs.get_mut(&app_id) {
                Some(rerun) if *rerun => {
                    *rerun = false;
                }
                _ => {
                    runs.remove(&app_id);
                    guard.armed = false;
                    self.idle.notify_all();
                    return;
                }
            }
        }
    }

    fn finish(&self, app_id: &str) {
        if let Ok(mut runs) = self.runs.lock() {
            runs.remove(app_id);
        }
        self.idle.notify_all();
    }
}

/// Clears the in-flight entry if a worker exits without doing so
struct RunGuard<'a> {
    inner: &'a Inner,
    app_id: &'a str,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.finish(self.app_id);
        }
    }
}
