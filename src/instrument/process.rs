// SPDX-License-Identifier: PMPL-1.0-or-later

//! External process runner with a hard deadline

use crate::error::{AssimilateError, Result};
use log::debug;
use std::ffi::{OsStr, OsString};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const STDERR_TAIL_CHARS: usize = 2000;

/// A fully resolved tool invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    /// Name used in logs and errors (`apktool`, `zipalign`, ...)
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
}

impl ToolCommand {
    pub fn new(tool: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Command line for logs; environment values are never shown
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Spawn, wait at most `timeout`, kill on expiry
///
/// A non-zero exit becomes `ToolFailed`; a missing program becomes
/// `ToolNotFound`. `search_path` replaces the child's `PATH` when set.
/// The deadline covers both the exit and the draining of its pipes, so a
/// background grandchild holding stdout open still counts as a timeout.
pub fn run(command: &ToolCommand, timeout: Duration, search_path: Option<&OsStr>) -> Result<ToolOutput> {
    debug!("exec: {}", command.display());
    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(path) = search_path {
        process.env("PATH", path);
    }
    for (key, value) in &command.envs {
        process.env(key, value);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        process.process_group(0);
    }

    let mut child = process.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            AssimilateError::ToolNotFound(format!("{} ({})", command.tool, command.program.display()))
        }
        _ => AssimilateError::from_io_error(command.program.display().to_string(), e),
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                kill(&mut child);
                return Err(AssimilateError::from_io_error(command.tool.clone(), e));
            }
        }
        if Instant::now() >= deadline {
            kill(&mut child);
            return Err(timed_out(command, timeout));
        }
        thread::sleep(Duration::from_millis(20));
    };

    let (stdout, stderr) = match (collect(&stdout, deadline), collect(&stderr, deadline)) {
        (Some(stdout), Some(stderr)) => (stdout, stderr),
        _ => {
            kill_group(child.id());
            return Err(timed_out(command, timeout));
        }
    };
    let output = ToolOutput {
        status: status.code(),
        stdout,
        stderr,
    };
    if !status.success() {
        return Err(AssimilateError::ToolFailed {
            tool: command.tool.clone(),
            status: output.status,
            stderr_tail: tail(&output.stderr, &output.stdout),
        });
    }
    Ok(output)
}

fn timed_out(command: &ToolCommand, timeout: Duration) -> AssimilateError {
    AssimilateError::Timeout {
        tool: command.tool.clone(),
        timeout_secs: timeout.as_secs(),
    }
}

fn kill(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

/// SIGKILL the whole process group led by `pid`
#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("killpg {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        let _ = sender.send(String::from_utf8_lossy(&buffer).into_owned());
    });
    receiver
}

/// `None` when the pipe is still open at the deadline
fn collect(receiver: &Receiver<String>, deadline: Instant) -> Option<String> {
    match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}

fn tail(stderr: &str, stdout: &str) -> String {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let mut text = source.trim().to_string();
    crate::types::truncate_to_tail(&mut text, STDERR_TAIL_CHARS);
    text
}
