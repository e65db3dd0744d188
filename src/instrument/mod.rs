// SPDX-License-Identifier: PMPL-1.0-or-later

//! Instrumentation orchestrator
//!
//! Decode, inject the splash asset, patch styles and manifest, rebuild,
//! align and sign. Two strategies share the patching stages: tool-based
//! (apktool + SDK tools) and tool-less (plain ZIP extract/re-pack). Every
//! stage failure is caught here and turned into a structured run outcome.

pub mod patch;
pub mod process;
pub mod repack;
pub mod signer;
pub mod tools;

use crate::config::InstrumentConfig;
use crate::error::{AssimilateError, Result};
use crate::registry::{sha256_file, BinaryRegistry};
use crate::tracker::{Checkpoint, RunTracker};
use crate::types::{AssimilatedApp, Signer};
use log::{info, warn};
use patch::PatchOutcome;
use process::ToolCommand;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tools::{Launcher, Toolbox};

/// Structured result of one run; never an `Err` for stage failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    #[serde(rename = "success")]
    Succeeded {
        signer: Signer,
        sha256: String,
        path: PathBuf,
    },
    #[serde(rename = "error")]
    Failed {
        kind: &'static str,
        message: String,
        progress: u8,
    },
    /// A newer upload replaced the generation this run started from
    Superseded,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    ToolBased(Launcher),
    ToolLess,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::ToolBased(_) => "tool-based",
            Strategy::ToolLess => "tool-less",
        }
    }
}

/// Why the pipeline stopped early
enum Abort {
    Superseded,
    Failed(AssimilateError),
}

impl From<AssimilateError> for Abort {
    fn from(error: AssimilateError) -> Self {
        Abort::Failed(error)
    }
}

type Flow<T> = std::result::Result<T, Abort>;

pub struct Orchestrator {
    config: InstrumentConfig,
    registry: BinaryRegistry,
}

impl Orchestrator {
    pub fn new(config: InstrumentConfig, registry: BinaryRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// Run the pipeline for the tracker's app and generation
    pub fn run(&self, tracker: &RunTracker) -> RunOutcome {
        let Some(app) = tracker.snapshot() else {
            return RunOutcome::Superseded;
        };
        let result = match tracker.begin() {
            Ok(true) => self.execute(tracker, &app),
            Ok(false) => Err(Abort::Superseded),
            Err(e) => Err(Abort::Failed(e)),
        };

        match result {
            Ok(outcome) => outcome,
            Err(Abort::Superseded) => {
                info!(
                    "Run for {} generation {} superseded",
                    tracker.app_id(),
                    tracker.generation()
                );
                RunOutcome::Superseded
            }
            Err(Abort::Failed(error)) => {
                if let Err(e) = tracker.fail(&error) {
                    warn!("Could not record failure for {}: {}", tracker.app_id(), e);
                }
                let progress = tracker
                    .snapshot()
                    .map(|app| app.instrumentation_progress)
                    .unwrap_or(0);
                RunOutcome::Failed {
                    kind: error.kind(),
                    message: error.to_string(),
                    progress,
                }
            }
        }
    }

    fn execute(&self, tracker: &RunTracker, app: &AssimilatedApp) -> Flow<RunOutcome> {
        let source = app
            .original_binary_path
            .clone()
            .filter(|path| path.is_file())
            .ok_or_else(|| AssimilateError::stage("start", "original upload is missing"))?;

        // Dropped on every return path, which removes all intermediates.
        let work = self.work_dir()?;
        let mut toolbox = Toolbox::new(&self.config, work.path());

        let strategy = self.select_strategy(&mut toolbox)?;
        note(tracker, &format!("strategy: {}", strategy.name()))?;

        let unsigned = match &strategy {
            Strategy::ToolBased(apktool) => self.build_with_apktool(tracker, apktool, &source, work.path())?,
            Strategy::ToolLess => self.build_without_tools(tracker, &source, work.path())?,
        };

        let (signer, signed) = self.sign(tracker, &mut toolbox, &strategy, &unsigned, work.path())?;

        if !tracker.is_current() {
            return Err(Abort::Superseded);
        }
        if app.original_apk_sha256.as_deref() == Some(sha256_file(&signed)?.as_str()) {
            return Err(AssimilateError::stage(
                "finalize",
                "instrumented artifact is byte-identical to the original",
            )
            .into());
        }
        let stored = self
            .registry
            .commit_instrumented(&app.id, tracker.generation(), &signed)?;
        match tracker.succeed(signer, &stored) {
            Ok(true) => {}
            Ok(false) => {
                self.registry.discard_instrumented(&app.id, tracker.generation());
                return Err(Abort::Superseded);
            }
            Err(e) => {
                self.registry.discard_instrumented(&app.id, tracker.generation());
                return Err(e.into());
            }
        }
        info!(
            "Instrumented {} with {} ({})",
            app.id,
            signer.as_str(),
            stored.sha256
        );
        Ok(RunOutcome::Succeeded {
            signer,
            sha256: stored.sha256,
            path: stored.path,
        })
    }

    fn work_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("chaos-run-");
        let dir = match &self.config.work_root {
            Some(root) => {
                std::fs::create_dir_all(root)
                    .map_err(|e| AssimilateError::from_io_error(root.display().to_string(), e))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        };
        dir.map_err(|e| AssimilateError::from_io_error("work directory", e))
    }

    /// Tool-less when forced or when no apktool can be resolved
    pub fn select_strategy(&self, toolbox: &mut Toolbox<'_>) -> Result<Strategy> {
        if self.config.toolless {
            return Ok(Strategy::ToolLess);
        }
        match toolbox.apktool() {
            Ok(launcher) => Ok(Strategy::ToolBased(launcher)),
            Err(e) if e.is_tool_not_found() => {
                warn!("apktool unavailable ({}); using tool-less strategy", e);
                Ok(Strategy::ToolLess)
            }
            Err(e) => Err(e),
        }
    }

    fn build_with_apktool(
        &self,
        tracker: &RunTracker,
        apktool: &Launcher,
        source: &Path,
        work: &Path,
    ) -> Flow<PathBuf> {
        let decoded = work.join("decoded");
        let decode = apktool
            .command("apktool")
            .arg("d")
            .arg("-f")
            .arg("-o")
            .path_arg(&decoded)
            .path_arg(source);
        self.exec(tracker, &decode)?;
        if !decoded.join("AndroidManifest.xml").is_file() {
            return Err(AssimilateError::stage("decode", "apktool produced no AndroidManifest.xml").into());
        }
        mark(tracker, Checkpoint::Decoded)?;

        self.patch_tree(tracker, &decoded)?;

        let rebuilt = work.join("rebuilt-unsigned.apk");
        let build = apktool
            .command("apktool")
            .arg("b")
            .path_arg(&decoded)
            .arg("-o")
            .path_arg(&rebuilt);
        self.exec(tracker, &build)?;
        if !rebuilt.is_file() {
            return Err(AssimilateError::stage("rebuild", "apktool produced no APK").into());
        }
        mark(tracker, Checkpoint::Rebuilt)?;
        Ok(rebuilt)
    }

    fn build_without_tools(&self, tracker: &RunTracker, source: &Path, work: &Path) -> Flow<PathBuf> {
        let extracted = work.join("extracted");
        let entries = repack::extract(source, &extracted)?;
        note(tracker, &format!("extracted {} entries", entries))?;
        mark(tracker, Checkpoint::Decoded)?;

        self.patch_tree(tracker, &extracted)?;

        let rebuilt = work.join("repacked-unsigned.apk");
        let packed = repack::repack(&extracted, &rebuilt)?;
        note(tracker, &format!("re-packed {} entries", packed))?;
        mark(tracker, Checkpoint::Rebuilt)?;
        Ok(rebuilt)
    }

    fn patch_tree(&self, tracker: &RunTracker, root: &Path) -> Flow<()> {
        let splash = patch::inject_splash(root, self.config.splash_image.as_deref())?;
        note(tracker, &format!("splash asset written to {}", display_relative(&splash, root)))?;
        mark(tracker, Checkpoint::AssetInjected)?;

        let styles = patch::patch_styles(root)?;
        note(tracker, &format!("styles: {}", styles.describe()))?;
        mark(tracker, Checkpoint::StylesPatched)?;

        let manifest = patch::patch_manifest(root)?;
        if let PatchOutcome::Skipped(reason) = manifest {
            warn!("Manifest theme not applied for {}: {}", tracker.app_id(), reason);
        }
        note(tracker, &format!("manifest: {}", manifest.describe()))?;
        mark(tracker, Checkpoint::ManifestPatched)?;
        Ok(())
    }

    /// apksigner when zipalign, apksigner and a keystore are all usable
    fn sign(
        &self,
        tracker: &RunTracker,
        toolbox: &mut Toolbox<'_>,
        strategy: &Strategy,
        unsigned: &Path,
        work: &Path,
    ) -> Flow<(Signer, PathBuf)> {
        if let Strategy::ToolBased(_) = strategy {
            match self.sdk_signing_tools(toolbox) {
                Ok((zipalign, apksigner, keystore)) => {
                    let aligned = work.join("aligned.apk");
                    self.exec(tracker, &signer::zipalign_command(&zipalign, unsigned, &aligned))?;
                    mark(tracker, Checkpoint::Aligned)?;

                    let signed = work.join("signed.apk");
                    note(tracker, &format!("exec: apksigner sign ({})", apksigner.display()))?;
                    signer::sign_with_apksigner(
                        &apksigner,
                        &keystore,
                        &aligned,
                        &signed,
                        self.config.tool_timeout,
                        toolbox.search_path(),
                    )?;
                    return Ok((Signer::Apksigner, signed));
                }
                Err(reason) => {
                    note(tracker, &format!("signing fallback: {}", reason))?;
                }
            }
        }

        let launcher = toolbox.uber_signer()?;
        note(tracker, &format!("exec: uber-apk-signer ({})", launcher.describe()))?;
        let signed = signer::sign_with_uber(
            &launcher,
            unsigned,
            &work.join("uber-out"),
            self.config.tool_timeout,
            toolbox.search_path(),
        )?;
        mark(tracker, Checkpoint::FallbackSigned)?;
        Ok((Signer::UberApkSigner, signed))
    }

    /// The reason string explains which requirement was missing
    fn sdk_signing_tools(
        &self,
        toolbox: &Toolbox<'_>,
    ) -> std::result::Result<(PathBuf, PathBuf, crate::config::KeystoreConfig), String> {
        let keystore = match &self.config.keystore {
            None => return Err("no keystore configured".to_string()),
            Some(keystore) if !keystore.path.is_file() => {
                warn!("Keystore {} does not exist", keystore.path.display());
                return Err(format!("keystore {} missing", keystore.path.display()));
            }
            Some(keystore) => keystore.clone(),
        };
        let zipalign = toolbox.zipalign().map_err(|e| e.to_string())?;
        let apksigner = toolbox.apksigner().map_err(|e| e.to_string())?;
        Ok((zipalign, apksigner, keystore))
    }

    fn exec(&self, tracker: &RunTracker, command: &ToolCommand) -> Flow<()> {
        note(tracker, &format!("exec: {}", command.display()))?;
        let output = process::run(command, self.config.tool_timeout, self.config.search_path.as_deref())?;
        let stdout = output.stdout.trim();
        if !stdout.is_empty() {
            let mut tail = stdout.to_string();
            crate::types::truncate_to_tail(&mut tail, 600);
            note(tracker, &tail)?;
        }
        Ok(())
    }
}

fn mark(tracker: &RunTracker, checkpoint: Checkpoint) -> Flow<()> {
    if tracker.checkpoint(checkpoint)? {
        Ok(())
    } else {
        Err(Abort::Superseded)
    }
}

fn note(tracker: &RunTracker, line: &str) -> Flow<()> {
    if tracker.log(line)? {
        Ok(())
    } else {
        Err(Abort::Superseded)
    }
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
