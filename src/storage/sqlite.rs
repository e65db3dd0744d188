// SPDX-License-Identifier: PMPL-1.0-or-later

//! Relational mirror of the record store
//!
//! Queryable columns for the fields operators filter on, plus the full
//! record as JSON so a mirror alone can rebuild the store.

use super::AppRepository;
use crate::error::{AssimilateError, Result};
use crate::types::AssimilatedApp;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create the database and run migrations
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AssimilateError::from_io_error(parent.display().to_string(), e)
                })?;
            }
        }
        let conn = Connection::open(path)?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.migrate()?;
        Ok(repo)
    }

    pub fn open_in_memory() -> Result<Self> {
        let repo = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        repo.migrate()?;
        Ok(repo)
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AssimilateError::Persistence("sqlite connection poisoned".into()))
    }

    fn migrate(&self) -> Result<()> {
        self.connection()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS assimilated_apps (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                package_name TEXT,
                bundle_id TEXT,
                version TEXT,
                status TEXT NOT NULL,
                instrumentation_progress INTEGER NOT NULL,
                chaos_instrumented INTEGER NOT NULL,
                signer TEXT,
                binary_path TEXT,
                original_apk_sha256 TEXT,
                instrumented_apk_sha256 TEXT,
                generation INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                record JSON NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_apps_user ON assimilated_apps(user_id);
            CREATE INDEX IF NOT EXISTS idx_apps_user_package ON assimilated_apps(user_id, package_name);
            CREATE INDEX IF NOT EXISTS idx_apps_user_bundle ON assimilated_apps(user_id, bundle_id);
            "#,
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .connection()?
            .query_row("SELECT COUNT(*) FROM assimilated_apps", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

impl AppRepository for SqliteRepository {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn load_all(&self) -> Result<Vec<AssimilatedApp>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT record FROM assimilated_apps ORDER BY id ASC")?;
        let records = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records
            .iter()
            .map(|json| serde_json::from_str(json).map_err(AssimilateError::from))
            .collect()
    }

    fn upsert(&self, app: &AssimilatedApp) -> Result<()> {
        let record = serde_json::to_string(app)?;
        self.connection()?.execute(
            "INSERT INTO assimilated_apps (
                id, user_id, platform, package_name, bundle_id, version, status,
                instrumentation_progress, chaos_instrumented, signer, binary_path,
                original_apk_sha256, instrumented_apk_sha256, generation, updated_at, record
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                platform = excluded.platform,
                package_name = excluded.package_name,
                bundle_id = excluded.bundle_id,
                version = excluded.version,
                status = excluded.status,
                instrumentation_progress = excluded.instrumentation_progress,
                chaos_instrumented = excluded.chaos_instrumented,
                signer = excluded.signer,
                binary_path = excluded.binary_path,
                original_apk_sha256 = excluded.original_apk_sha256,
                instrumented_apk_sha256 = excluded.instrumented_apk_sha256,
                generation = excluded.generation,
                updated_at = excluded.updated_at,
                record = excluded.record",
            params![
                app.id,
                app.user_id,
                app.platform.as_str(),
                app.package_name,
                app.bundle_id,
                app.version,
                app.status.as_str(),
                app.instrumentation_progress as i64,
                app.chaos_instrumented as i64,
                app.signer.map(|s| s.as_str()),
                app.binary_path.as_ref().map(|p| p.display().to_string()),
                app.original_apk_sha256,
                app.instrumented_apk_sha256,
                app.generation as i64,
                Utc::now().to_rfc3339(),
                record,
            ],
        )?;
        Ok(())
    }

    fn remove(&self, app_id: &str) -> Result<()> {
        self.connection()?
            .execute("DELETE FROM assimilated_apps WHERE id = ?1", params![app_id])?;
        Ok(())
    }
}
