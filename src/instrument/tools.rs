// SPDX-License-Identifier: PMPL-1.0-or-later

//! Tool resolution chains
//!
//! Every lookup tries explicit configuration first, then the captured
//! `PATH`, then the Android SDK, then (for jars) a download into the run's
//! work directory. Only `ToolNotFound` moves a chain to its next step.

use super::process::ToolCommand;
use crate::config::InstrumentConfig;
use crate::error::{AssimilateError, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// How a tool is launched: native executable or jar under a JVM
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    Binary(PathBuf),
    Jar { java: PathBuf, jar: PathBuf },
}

impl Launcher {
    pub fn command(&self, tool: &str) -> ToolCommand {
        match self {
            Launcher::Binary(path) => ToolCommand::new(tool, path),
            Launcher::Jar { java, jar } => ToolCommand::new(tool, java).arg("-jar").path_arg(jar),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Launcher::Binary(path) => path.display().to_string(),
            Launcher::Jar { java, jar } => format!("{} -jar {}", java.display(), jar.display()),
        }
    }
}

/// Per-run tool resolver; downloads are cached for the life of the run
pub struct Toolbox<'a> {
    config: &'a InstrumentConfig,
    download_dir: PathBuf,
    downloaded: HashMap<String, PathBuf>,
}

impl<'a> Toolbox<'a> {
    pub fn new(config: &'a InstrumentConfig, work_dir: &Path) -> Self {
        Self {
            config,
            download_dir: work_dir.join("tools"),
            downloaded: HashMap::new(),
        }
    }

    pub fn search_path(&self) -> Option<&OsStr> {
        self.config.search_path.as_deref()
    }

    /// JAVA_BIN, then JAVA_HOME/bin/java, then `java` on PATH
    pub fn java(&self) -> Result<PathBuf> {
        if let Some(path) = explicit(self.config.java_bin.as_deref(), "JAVA_BIN") {
            return Ok(path);
        }
        if let Some(home) = &self.config.java_home {
            let candidate = home.join("bin").join(exe_name("java"));
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }
        which("java", self.search_path())
            .ok_or_else(|| AssimilateError::ToolNotFound("java (no JVM available)".into()))
    }

    /// APKTOOL_BIN, `apktool` on PATH, APKTOOL_JAR, downloaded jar
    pub fn apktool(&mut self) -> Result<Launcher> {
        if let Some(launcher) = self.local_apktool()? {
            return Ok(launcher);
        }
        // A jar is useless without a JVM; check before downloading.
        let java = self.java()?;
        let url = self.config.apktool_jar_url.clone();
        let jar = self.download(&url, "apktool.jar")?;
        Ok(Launcher::Jar { java, jar })
    }

    /// The chain without its download step; `None` when only a download is left
    pub fn local_apktool(&self) -> Result<Option<Launcher>> {
        if let Some(path) = explicit(self.config.apktool_bin.as_deref(), "APKTOOL_BIN") {
            return Ok(Some(Launcher::Binary(path)));
        }
        if let Some(path) = which("apktool", self.search_path()) {
            return Ok(Some(Launcher::Binary(path)));
        }
        if let Some(jar) = self.config.apktool_jar.as_ref().filter(|jar| jar.is_file()) {
            return Ok(Some(Launcher::Jar {
                java: self.java()?,
                jar: jar.clone(),
            }));
        }
        Ok(None)
    }

    pub fn zipalign(&self) -> Result<PathBuf> {
        self.sdk_tool("zipalign", self.config.zipalign_bin.as_deref(), "ZIPALIGN_BIN")
    }

    pub fn apksigner(&self) -> Result<PathBuf> {
        self.sdk_tool("apksigner", self.config.apksigner_bin.as_deref(), "APKSIGNER_BIN")
    }

    /// CHAOS_UBER_APK_SIGNER_JAR or a downloaded release, under a JVM
    pub fn uber_signer(&mut self) -> Result<Launcher> {
        let java = self.java()?;
        if let Some(jar) = self.config.uber_signer_jar.as_ref().filter(|jar| jar.is_file()) {
            return Ok(Launcher::Jar {
                java,
                jar: jar.clone(),
            });
        }
        let url = self.config.uber_signer_url.clone();
        let jar = self.download(&url, "uber-apk-signer.jar")?;
        Ok(Launcher::Jar { java, jar })
    }

    fn sdk_tool(&self, name: &str, configured: Option<&Path>, key: &str) -> Result<PathBuf> {
        if let Some(path) = explicit(configured, key) {
            return Ok(path);
        }
        if let Some(path) = which(name, self.search_path()) {
            return Ok(path);
        }
        for root in &self.config.sdk_roots {
            if let Some(path) = build_tools_binary(root, name) {
                return Ok(path);
            }
        }
        Err(AssimilateError::ToolNotFound(name.to_string()))
    }

    /// Fetch `url` once per run into the work directory
    pub fn download(&mut self, url: &str, file_name: &str) -> Result<PathBuf> {
        if let Some(path) = self.downloaded.get(url) {
            return Ok(path.clone());
        }
        fs::create_dir_all(&self.download_dir).map_err(|e| {
            AssimilateError::from_io_error(self.download_dir.display().to_string(), e)
        })?;
        let target = self.download_dir.join(file_name);

        let attempts = self.config.download_retries + 1;
        let mut last_reason = String::new();
        for attempt in 1..=attempts {
            info!("Downloading {} (attempt {}/{})", url, attempt, attempts);
            match fetch(url, &target, self.config.download_timeout) {
                Ok(()) => {
                    self.downloaded.insert(url.to_string(), target.clone());
                    return Ok(target);
                }
                Err(reason) => {
                    warn!("Download of {} failed: {}", url, reason);
                    last_reason = reason;
                    if attempt < attempts {
                        thread::sleep(Duration::from_millis(250 * attempt as u64));
                    }
                }
            }
        }
        Err(AssimilateError::Download {
            url: url.to_string(),
            reason: last_reason,
        })
    }
}

fn fetch(url: &str, target: &Path, timeout: Duration) -> std::result::Result<(), String> {
    if let Some(source) = url.strip_prefix("file://") {
        let bytes = fs::read(source).map_err(|e| format!("{}: {}", source, e))?;
        return store_jar(target, &bytes);
    }

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(15).min(timeout))
        .timeout(timeout)
        .redirects(8)
        .build();
    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(code, _)) => return Err(format!("http status {}", code)),
        Err(ureq::Error::Transport(err)) => return Err(format!("transport error: {}", err)),
    };
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(256 * 1024 * 1024)
        .read_to_end(&mut bytes)
        .map_err(|e| format!("read error: {}", e))?;
    store_jar(target, &bytes)
}

/// Jars are ZIP files; anything else (HTML error pages) is rejected
fn store_jar(target: &Path, bytes: &[u8]) -> std::result::Result<(), String> {
    if !bytes.starts_with(b"PK") {
        return Err("payload is not a jar archive".to_string());
    }
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut staging = tempfile::NamedTempFile::new_in(dir).map_err(|e| e.to_string())?;
    staging.write_all(bytes).map_err(|e| e.to_string())?;
    staging.persist(target).map_err(|e| e.error.to_string())?;
    Ok(())
}

fn explicit(path: Option<&Path>, key: &str) -> Option<PathBuf> {
    let path = path?;
    if path.is_file() {
        Some(path.to_path_buf())
    } else {
        warn!("{} points at {}, which does not exist", key, path.display());
        None
    }
}

/// Locate `name` on the given search path (or the process PATH)
pub fn which(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let owned;
    let paths = match search_path {
        Some(paths) => paths,
        None => {
            owned = env::var_os("PATH")?;
            owned.as_os_str()
        }
    };
    env::split_paths(paths)
        .map(|dir| dir.join(exe_name(name)))
        .find(|candidate| is_executable(candidate))
}

/// Highest `build-tools/<version>/<name>` under an SDK root
pub fn build_tools_binary(sdk_root: &Path, name: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(sdk_root.join("build-tools")).ok()?;
    let mut versions: Vec<(Vec<u32>, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let version = entry.file_name().to_string_lossy().to_string();
            let key: Vec<u32> = version
                .split(|c: char| !c.is_ascii_digit())
                .filter_map(|part| part.parse().ok())
                .collect();
            let candidate = entry.path().join(exe_name(name));
            (!key.is_empty() && is_executable(&candidate)).then_some((key, candidate))
        })
        .collect();
    versions.sort();
    versions.pop().map(|(_, path)| path)
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
