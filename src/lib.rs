// SPDX-License-Identifier: PMPL-1.0-or-later

//! apk-assimilator: mobile package analysis and best-effort instrumentation.
//!
//! Uploaded APK/IPA containers are parsed for structural and security
//! metadata, scored, and (for Android) run through an instrumentation
//! pipeline that injects a splash theme, repackages and re-signs the
//! artifact while tracking per-stage progress.
//!
//! PIPELINE:
//! 1. **Analysis**: container, manifest/plist, heuristic score, integration points.
//! 2. **Dedup**: one record per (owner, package name | bundle id), versioned
//!    by upload generation.
//! 3. **Instrument**: tool-based (apktool + SDK) or tool-less (ZIP) strategy,
//!    with apksigner or uber-apk-signer for signing.
//! 4. **Storage**: in-memory records, JSON snapshot and a SQLite mirror.

pub mod analysis;
pub mod config;
pub mod container;
pub mod dedup;
pub mod diagnostics;
pub mod error;
pub mod instrument;
pub mod output;
pub mod registry;
pub mod service;
pub mod storage;
pub mod tracker;
pub mod types;

pub use error::{AssimilateError, Result};
pub use service::AssimilationService;
