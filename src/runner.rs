// src/runner.rs

//! Script execution
//!
//! Install and uninstall scripts are opaque. They run with the package
//! directory as working directory, a small environment describing the
//! package, and a wall-clock limit after which the process is killed.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often a running script is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Interpreter used when a script has no `#!` line
const DEFAULT_SHELL: &str = "sh";

/// Result of one script run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    /// Exit code; `None` when killed or terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }

    /// One-line reason for a failed run
    pub fn failure_reason(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        let code = match self.status {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        match self.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(line) => format!("{}: {}", code, line.trim()),
            None => code,
        }
    }
}

/// Executes a script file
pub trait ScriptRunner {
    fn run(
        &self,
        script: &Path,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ScriptOutput>;
}

/// Runs scripts through their `#!` interpreter, or `sh` without one
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

/// Interpreter and optional argument from the first line of a script
fn interpreter(script: &Path) -> Result<(String, Option<String>)> {
    let mut head = [0u8; 256];
    let mut file = File::open(script)?;
    let n = file.read(&mut head)?;
    let first_line = String::from_utf8_lossy(&head[..n])
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();

    match first_line.strip_prefix("#!") {
        Some(rest) => {
            let rest = rest.trim();
            match rest.split_once(char::is_whitespace) {
                Some((program, arg)) => Ok((program.to_string(), Some(arg.trim().to_string()))),
                None if !rest.is_empty() => Ok((rest.to_string(), None)),
                None => Ok((DEFAULT_SHELL.to_string(), None)),
            }
        }
        None => Ok((DEFAULT_SHELL.to_string(), None)),
    }
}

fn read_capture(mut file: File, stream: &str) -> String {
    let mut bytes = Vec::new();
    let read = file
        .seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut bytes));
    if let Err(e) = read {
        warn!("Could not read captured {}: {}", stream, e);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Kill the script together with anything it started in the background
#[cfg(unix)]
fn kill_script(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    // The script leads its own process group, so its pid is the group id
    let group = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(group, Signal::SIGKILL) {
        warn!("Failed to kill process group {}: {}", group, e);
        if let Err(e) = child.kill() {
            warn!("Failed to kill script (pid {}): {}", child.id(), e);
        }
    }
}

#[cfg(not(unix))]
fn kill_script(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("Failed to kill script (pid {}): {}", child.id(), e);
    }
}

impl ScriptRunner for ShellRunner {
    fn run(
        &self,
        script: &Path,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ScriptOutput> {
        let script = fs::canonicalize(script)?;
        let (program, arg) = interpreter(&script)?;
        debug!("Running {} with {}", script.display(), program);

        let stdout = tempfile::tempfile()?;
        let stderr = tempfile::tempfile()?;

        let mut command = Command::new(&program);
        if let Some(arg) = &arg {
            command.arg(arg);
        }
        command
            .arg(&script)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?));
        if let Some(dir) = script.parent() {
            command.current_dir(dir);
        }

        // Own process group: a terminal interrupt reaches alp, not the script
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| Error::ExecutionFailed {
            package: script.display().to_string(),
            reason: format!("failed to start {}: {}", program, e),
        })?;

        let (status, timed_out) = loop {
            match child.try_wait()? {
                Some(status) => break (status.code(), false),
                None => {
                    if start.elapsed() > timeout {
                        warn!(
                            "{} exceeded {}s, killing it",
                            script.display(),
                            timeout.as_secs()
                        );
                        kill_script(&mut child);
                        if let Err(e) = child.wait() {
                            debug!("Reaping {} failed: {}", script.display(), e);
                        }
                        break (None, true);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        };

        debug!(
            "{} finished in {:?} (status {:?})",
            script.display(),
            start.elapsed(),
            status
        );
        Ok(ScriptOutput {
            status,
            stdout: read_capture(stdout, "stdout"),
            stderr: read_capture(stderr, "stderr"),
            timed_out,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_captures_output_and_env() {
        let dir = tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "alp.sh",
            "#!/bin/sh\necho \"hello $ALP_PACKAGE\"\necho oops >&2\nexit 0\n",
        );
        let mut env = BTreeMap::new();
        env.insert("ALP_PACKAGE".to_string(), "demo".to_string());

        let out = ShellRunner::new()
            .run(&script, &env, Duration::from_secs(10))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello demo\n");
        assert_eq!(out.stderr, "oops\n");
    }

    #[test]
    fn test_runs_in_script_directory_without_shebang() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "alp.sh", "touch marker\n");

        let out = ShellRunner::new()
            .run(&script, &BTreeMap::new(), Duration::from_secs(10))
            .unwrap();
        assert!(out.success());
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn test_nonzero_exit() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "alp.sh", "#!/bin/sh\necho broken >&2\nexit 3\n");

        let out = ShellRunner::new()
            .run(&script, &BTreeMap::new(), Duration::from_secs(10))
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.status, Some(3));
        assert_eq!(out.failure_reason(), "exit status 3: broken");
    }

    #[test]
    fn test_timeout_kills_script() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "alp.sh", "#!/bin/sh\nexec sleep 5\n");

        let start = Instant::now();
        let out = ShellRunner::new()
            .run(&script, &BTreeMap::new(), Duration::from_millis(200))
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_timeout_kills_background_jobs() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("late");
        let script = write_script(
            dir.path(),
            "alp.sh",
            &format!("#!/bin/sh\n(sleep 1; touch {}) &\nsleep 30\n", marker.display()),
        );

        let out = ShellRunner::new()
            .run(&script, &BTreeMap::new(), Duration::from_millis(300))
            .unwrap();
        assert!(out.timed_out);

        std::thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists());
    }

    #[test]
    fn test_interpreter_with_argument() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "x.sh", "#!/usr/bin/env sh\nexit 0\n");
        assert_eq!(
            interpreter(&script).unwrap(),
            ("/usr/bin/env".to_string(), Some("sh".to_string()))
        );
    }
}
