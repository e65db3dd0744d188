// SPDX-License-Identifier: PMPL-1.0-or-later

//! Record store for assimilated apps
//!
//! The in-memory map is authoritative. Every mutation is followed by a full
//! JSON snapshot and an upsert/delete on each configured mirror. Persistence
//! failures are logged and counted but never fail the mutation.

pub mod snapshot;
pub mod sqlite;

pub use snapshot::JsonSnapshot;
pub use sqlite::SqliteRepository;

use crate::error::{AssimilateError, Result};
use crate::types::{AppStatus, AssimilatedApp};
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

/// Secondary store that mirrors records one at a time
pub trait AppRepository: Send + Sync {
    fn name(&self) -> &'static str;
    fn load_all(&self) -> Result<Vec<AssimilatedApp>>;
    fn upsert(&self, app: &AssimilatedApp) -> Result<()>;
    fn remove(&self, app_id: &str) -> Result<()>;
}

/// Counters exposed to operators for best-effort persistence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceHealth {
    pub snapshot_writes: u64,
    pub snapshot_failures: u64,
    pub mirror_writes: u64,
    pub mirror_failures: u64,
    pub last_error: Option<String>,
}

impl PersistenceHealth {
    pub fn is_healthy(&self) -> bool {
        self.snapshot_failures == 0 && self.mirror_failures == 0
    }
}

/// What a mutation did to one record, so persistence can follow it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Upserted(String),
    Removed(String),
    Unchanged,
}

pub struct AppStore {
    apps: RwLock<BTreeMap<String, AssimilatedApp>>,
    snapshot: Option<JsonSnapshot>,
    mirrors: Vec<Box<dyn AppRepository>>,
    health: Mutex<PersistenceHealth>,
    /// Serializes snapshot writes in mutation order.
    write_order: Mutex<()>,
}

impl AppStore {
    /// Store with no persistence at all
    pub fn in_memory() -> Self {
        Self::from_parts(BTreeMap::new(), None, Vec::new())
    }

    /// Load from the snapshot, falling back to the first mirror that has rows
    pub fn open(snapshot: JsonSnapshot, mirrors: Vec<Box<dyn AppRepository>>) -> Self {
        let mut apps = match snapshot.load() {
            Ok(Some(apps)) => {
                info!(
                    "Loaded {} records from {}",
                    apps.len(),
                    snapshot.path().display()
                );
                Some(apps)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Snapshot {} unreadable: {}", snapshot.path().display(), e);
                None
            }
        };

        if apps.is_none() {
            for mirror in &mirrors {
                match mirror.load_all() {
                    Ok(rows) if !rows.is_empty() => {
                        info!("Rebuilt {} records from {} mirror", rows.len(), mirror.name());
                        apps = Some(rows.into_iter().map(|app| (app.id.clone(), app)).collect());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("{} mirror unreadable: {}", mirror.name(), e),
                }
            }
        }

        let mut apps = apps.unwrap_or_default();
        recover_interrupted(&mut apps);
        Self::from_parts(apps, Some(snapshot), mirrors)
    }

    fn from_parts(
        apps: BTreeMap<String, AssimilatedApp>,
        snapshot: Option<JsonSnapshot>,
        mirrors: Vec<Box<dyn AppRepository>>,
    ) -> Self {
        Self {
            apps: RwLock::new(apps),
            snapshot,
            mirrors,
            health: Mutex::new(PersistenceHealth::default()),
            write_order: Mutex::new(()),
        }
    }

    pub fn get(&self, app_id: &str) -> Option<AssimilatedApp> {
        self.read_map().ok()?.get(app_id).cloned()
    }

    pub fn list_for(&self, user_id: &str) -> Vec<AssimilatedApp> {
        self.read_map()
            .map(|apps| {
                let mut owned: Vec<AssimilatedApp> = apps
                    .values()
                    .filter(|app| app.user_id == user_id)
                    .cloned()
                    .collect();
                owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                owned
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read_map().map(|apps| apps.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn health(&self) -> PersistenceHealth {
        self.health
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Run `f` against the whole map under the write lock, then persist
    pub fn transact<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut BTreeMap<String, AssimilatedApp>) -> Result<(R, Change)>,
    {
        let mut apps = self
            .apps
            .write()
            .map_err(|_| AssimilateError::Persistence("record store poisoned".into()))?;
        let (result, change) = f(&mut apps)?;
        if change == Change::Unchanged {
            return Ok(result);
        }

        let rendered = match &self.snapshot {
            Some(_) => Some(JsonSnapshot::render(&apps)),
            None => None,
        };
        let record = match &change {
            Change::Upserted(id) => apps.get(id).cloned(),
            _ => None,
        };
        let order = self.write_order.lock();
        drop(apps);

        if let (Some(snapshot), Some(rendered)) = (&self.snapshot, rendered) {
            let outcome = rendered.and_then(|payload| snapshot.write_rendered(&payload));
            self.record_snapshot(outcome);
        }
        for mirror in &self.mirrors {
            let outcome = match (&change, &record) {
                (Change::Upserted(_), Some(app)) => mirror.upsert(app),
                (Change::Removed(id), _) => mirror.remove(id),
                _ => Ok(()),
            };
            self.record_mirror(mirror.name(), outcome);
        }
        drop(order);
        Ok(result)
    }

    pub fn insert(&self, app: AssimilatedApp) -> Result<()> {
        self.transact(|apps| {
            let id = app.id.clone();
            apps.insert(id.clone(), app);
            Ok(((), Change::Upserted(id)))
        })
    }

    /// Mutate one record; `NotFound` if it does not exist
    pub fn update<R, F>(&self, app_id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut AssimilatedApp) -> R,
    {
        self.transact(|apps| {
            let app = apps
                .get_mut(app_id)
                .ok_or_else(|| AssimilateError::NotFound(app_id.to_string()))?;
            let result = f(app);
            Ok((result, Change::Upserted(app_id.to_string())))
        })
    }

    pub fn remove(&self, app_id: &str) -> Result<AssimilatedApp> {
        self.transact(|apps| {
            let removed = apps
                .remove(app_id)
                .ok_or_else(|| AssimilateError::NotFound(app_id.to_string()))?;
            Ok((removed, Change::Removed(app_id.to_string())))
        })
    }

    fn read_map(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, AssimilatedApp>>> {
        self.apps
            .read()
            .map_err(|_| AssimilateError::Persistence("record store poisoned".into()))
    }

    fn record_snapshot(&self, outcome: Result<()>) {
        let Ok(mut health) = self.health.lock() else {
            return;
        };
        match outcome {
            Ok(()) => health.snapshot_writes += 1,
            Err(e) => {
                warn!("Snapshot write failed: {}", e);
                health.snapshot_failures += 1;
                health.last_error = Some(e.to_string());
            }
        }
    }

    fn record_mirror(&self, name: &str, outcome: Result<()>) {
        let Ok(mut health) = self.health.lock() else {
            return;
        };
        match outcome {
            Ok(()) => health.mirror_writes += 1,
            Err(e) => {
                warn!("{} mirror write failed: {}", name, e);
                health.mirror_failures += 1;
                health.last_error = Some(format!("{}: {}", name, e));
            }
        }
    }
}

/// A record left `running` by a previous process can never finish
fn recover_interrupted(apps: &mut BTreeMap<String, AssimilatedApp>) {
    for app in apps.values_mut() {
        if app.status == AppStatus::Running {
            warn!("Run for {} was interrupted by a restart", app.id);
            app.status = AppStatus::Error;
            app.chaos_instrumented = false;
            app.last_error = Some("instrumentation interrupted by restart".to_string());
            app.append_log("instrumentation interrupted by restart");
            app.finished_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppMetadata;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FailingMirror;

    impl AppRepository for FailingMirror {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn load_all(&self) -> Result<Vec<AssimilatedApp>> {
            Ok(Vec::new())
        }
        fn upsert(&self, _app: &AssimilatedApp) -> Result<()> {
            Err(AssimilateError::Persistence("mirror offline".into()))
        }
        fn remove(&self, _app_id: &str) -> Result<()> {
            Err(AssimilateError::Persistence("mirror offline".into()))
        }
    }

    fn app(id: &str, user: &str) -> AssimilatedApp {
        AssimilatedApp::new(id.into(), user, AppMetadata::default(), Utc::now())
    }

    #[test]
    fn mutations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("apps.json");
        let store = AppStore::open(JsonSnapshot::new(&path), Vec::new());
        store.insert(app("a", "u")).unwrap();
        store
            .update("a", |record| record.instrumentation_progress = 45)
            .unwrap();

        let reopened = AppStore::open(JsonSnapshot::new(&path), Vec::new());
        assert_eq!(reopened.get("a").unwrap().instrumentation_progress, 45);
        assert_eq!(reopened.health().snapshot_writes, 0);
        assert_eq!(store.health().snapshot_writes, 2);
    }

    #[test]
    fn mirror_failure_is_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        let store = AppStore::open(
            JsonSnapshot::new(dir.path().join("s.json")),
            vec![Box::new(FailingMirror)],
        );
        store.insert(app("a", "u")).unwrap();
        let health = store.health();
        assert_eq!(health.mirror_failures, 1);
        assert!(!health.is_healthy());
        assert!(store.get("a").is_some());
    }

    #[test]
    fn rebuilds_from_mirror_when_snapshot_missing() {
        let dir = TempDir::new().unwrap();
        let mirror = SqliteRepository::open(&dir.path().join("db.sqlite3")).unwrap();
        mirror.upsert(&app("from-db", "u")).unwrap();

        let store = AppStore::open(
            JsonSnapshot::new(dir.path().join("absent.json")),
            vec![Box::new(mirror)],
        );
        assert!(store.get("from-db").is_some());
    }

    #[test]
    fn running_records_are_failed_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("apps.json");
        let store = AppStore::open(JsonSnapshot::new(&path), Vec::new());
        let mut running = app("r", "u");
        running.status = AppStatus::Running;
        store.insert(running).unwrap();

        let reopened = AppStore::open(JsonSnapshot::new(&path), Vec::new());
        let record = reopened.get("r").unwrap();
        assert_eq!(record.status, AppStatus::Error);
        assert!(record.last_error.is_some());
    }

    #[test]
    fn list_is_scoped_to_owner() {
        let store = AppStore::in_memory();
        store.insert(app("a", "alice")).unwrap();
        store.insert(app("b", "bob")).unwrap();
        let ids: Vec<String> = store.list_for("alice").into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(AppStore::in_memory());
        store.insert(app("a", "u")).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store
                            .update("a", |r| r.append_log("tick"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let log = store.get("a").unwrap().instrumentation_log;
        assert_eq!(log.matches("tick").count(), 200);
    }
}
