// SPDX-License-Identifier: PMPL-1.0-or-later

//! apk-assimilator: analyze, assimilate and instrument mobile packages
//!
//! Configuration comes from the environment (see `config.rs`); the CLI only
//! names the package and the acting user.

use anyhow::{anyhow, Context, Result};
use apk_assimilator::config::ServiceConfig;
use apk_assimilator::output::{self, OutputFormat};
use apk_assimilator::types::{AppStatus, Platform};
use apk_assimilator::{diagnostics, AssimilationService};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "apk-assimilator")]
#[command(version)]
#[command(about = "Mobile package analysis and best-effort instrumentation")]
#[command(long_about = None)]
struct Cli {
    /// Data directory (overrides CHAOS_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    Apk,
    Ios,
}

impl From<PlatformArg> for Platform {
    fn from(value: PlatformArg) -> Self {
        match value {
            PlatformArg::Apk => Platform::Apk,
            PlatformArg::Ios => Platform::Ios,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a package without storing anything
    Analyze {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Declared package type (default: from the file extension)
        #[arg(short = 't', long = "type", value_enum)]
        platform: Option<PlatformArg>,

        /// Machine-readable output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Write the analysis to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Analyze, store and instrument a package
    Assimilate {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Owner of the record
        #[arg(short, long)]
        user: String,

        #[arg(short = 't', long = "type", value_enum)]
        platform: Option<PlatformArg>,

        /// Seconds to wait for the background run before returning
        #[arg(short, long, default_value = "900")]
        wait: u64,
    },

    /// Show one record
    Status {
        #[arg(value_name = "ID")]
        id: String,

        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// List a user's apps
    List {
        #[arg(short, long)]
        user: String,
    },

    /// Locate (and optionally verify or copy) the current artifact
    Binary {
        #[arg(value_name = "ID")]
        id: String,

        #[arg(short, long)]
        user: String,

        /// Re-hash the artifact and compare with the recorded digest
        #[arg(long)]
        verify: bool,

        /// Copy the verified artifact here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print launch information for the current artifact
    Launch {
        #[arg(value_name = "ID")]
        id: String,

        #[arg(short, long)]
        user: String,
    },

    /// Set a display name override
    Rename {
        #[arg(value_name = "ID")]
        id: String,

        #[arg(short, long)]
        user: String,

        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Delete a record and its stored binaries
    Delete {
        #[arg(value_name = "ID")]
        id: String,

        #[arg(short, long)]
        user: String,
    },

    /// List, apply or revert improvement suggestions
    Suggest {
        #[arg(value_name = "ID")]
        id: String,

        #[arg(short, long)]
        user: String,

        /// Suggestion id to apply
        #[arg(long, conflicts_with = "revert")]
        apply: Option<String>,

        /// Suggestion id to revert
        #[arg(long)]
        revert: Option<String>,
    },

    /// Check tools, keystore and storage
    Diagnostics,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = ServiceConfig::from_env();
    if let Some(dir) = cli.data_dir {
        let database = config.database_path.is_some();
        config = ServiceConfig::new(dir, config.instrument);
        if !database {
            config = config.without_database();
        }
    }

    // These two never touch the record store.
    let command = match cli.command {
        Commands::Diagnostics => return diagnostics::run_self_diagnostics(&config),
        Commands::Analyze {
            file,
            platform,
            format,
            output,
        } => return analyze(&file, platform, format, output.as_deref()),
        command => command,
    };

    let service = AssimilationService::open(config)?;
    match command {
        Commands::Assimilate {
            file,
            user,
            platform,
            wait,
        } => {
            let platform = resolve_platform(&file, platform)?;
            let bytes = read_package(&file)?;
            let metadata = service.analyze(&bytes, platform)?;
            let result = service.assimilate(metadata, &user, &bytes)?;
            println!(
                "{} {} ({})",
                if result.is_update { "Updated" } else { "Created" },
                result.app.id.bold(),
                result.app.display_name()
            );

            if result.instrumentation_started {
                println!("Instrumentation running in the background...");
                if !service.wait_for_run(&result.app.id, Duration::from_secs(wait)) {
                    println!("Still running after {}s; check `status {}`", wait, result.app.id);
                }
            }
            if let Some(app) = service.get_status(&result.app.id) {
                output::print_status(&app);
                if app.status == AppStatus::Error {
                    return Err(anyhow!("instrumentation failed"));
                }
            }
        }

        Commands::Status { id, format } => {
            let app = service
                .get_status(&id)
                .ok_or_else(|| anyhow!("app '{}' not found", id))?;
            match format {
                Some(format) => println!("{}", format.serialize(&app)?),
                None => output::print_status(&app),
            }
        }

        Commands::List { user } => output::print_summaries(&service.list_apps(&user)),

        Commands::Binary {
            id,
            user,
            verify,
            output,
        } => {
            let binary = service
                .get_binary(&id, &user)?
                .ok_or_else(|| anyhow!("no binary stored for '{}'", id))?;
            println!(
                "{} ({}, {})",
                binary.path.display(),
                binary.binary_type.as_str(),
                if binary.instrumented { "instrumented" } else { "original" }
            );
            if verify || output.is_some() {
                let bytes = service.read_verified(&id, &user)?;
                println!("  sha256 verified ({} bytes)", bytes.len());
                if let Some(path) = output {
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("  Copied to {}", path.display());
                }
            }
        }

        Commands::Launch { id, user } => {
            let info = service.launch_info(&id, &user)?;
            println!("{}: {}", info.name.bold(), info.binary.path.display());
            println!("  {}", info.note);
        }

        Commands::Rename { id, user, name } => {
            let summary = service.rename_app(&id, &user, &name)?;
            println!("Renamed {} to {}", summary.app_id, summary.name);
        }

        Commands::Delete { id, user } => {
            service.delete_app(&id, &user)?;
            println!("Deleted {}", id);
        }

        Commands::Suggest {
            id,
            user,
            apply,
            revert,
        } => {
            if let Some(suggestion) = apply {
                let applied = service.apply_suggestion(&id, &user, &suggestion)?;
                println!("Applied {} at {}", applied.suggestion.id, applied.applied_at);
            } else if let Some(suggestion) = revert {
                service.revert_suggestion(&id, &user, &suggestion)?;
                println!("Reverted {}", suggestion);
            } else {
                let suggestions = service.suggestions(&id, &user)?;
                if suggestions.is_empty() {
                    println!("No suggestions for {}", id);
                }
                for suggestion in &suggestions {
                    println!("  {} [{}]", suggestion.id.bold(), suggestion.impact);
                    println!("    {}", suggestion.description);
                }
            }
        }

        Commands::Analyze { .. } | Commands::Diagnostics => unreachable!(),
    }

    let health = service.persistence_health();
    if !health.is_healthy() {
        eprintln!(
            "{} persistence degraded: {}",
            "warning:".yellow(),
            health.last_error.unwrap_or_default()
        );
    }
    Ok(())
}

fn analyze(
    file: &Path,
    platform: Option<PlatformArg>,
    format: Option<OutputFormat>,
    destination: Option<&Path>,
) -> Result<()> {
    let platform = resolve_platform(file, platform)?;
    let bytes = read_package(file)?;
    let metadata = apk_assimilator::analysis::analyze(&bytes, platform)?;

    if let Some(path) = destination {
        let format = format
            .or_else(|| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .and_then(OutputFormat::parse)
            })
            .unwrap_or(OutputFormat::Json);
        std::fs::write(path, format.serialize(&metadata)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Analysis saved to: {}", path.display());
    } else if let Some(format) = format {
        println!("{}", format.serialize(&metadata)?);
    } else {
        output::print_analysis(&metadata);
    }
    Ok(())
}

fn resolve_platform(file: &Path, declared: Option<PlatformArg>) -> Result<Platform> {
    declared
        .map(Platform::from)
        .or_else(|| Platform::from_file_name(&file.to_string_lossy()))
        .ok_or_else(|| anyhow!("cannot infer package type of {}; pass --type", file.display()))
}

fn read_package(file: &Path) -> Result<Vec<u8>> {
    std::fs::read(file).with_context(|| format!("reading {}", file.display()))
}
