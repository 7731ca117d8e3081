//! Process supervisor: spawns, monitors, stops, and terminates the Tor child
//! process. Restart is orchestrated one level up, in `crate::facade`, since it
//! needs to prefer a control-port `SIGNAL SHUTDOWN` over the raw OS signal this
//! module falls back to.
//!
//! Generalizes `privacy::ctor::CTorHiddenService::start`/`shutdown`/`Drop` (spawn,
//! stderr bootstrap scan, kill-and-wait) from a single hardcoded hidden service
//! into the full start/stop/force-stop/terminate-all lifecycle.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sysinfo::System;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::ProcessError;

/// Snapshot of the supervised child: PID, start time, and last-observed liveness.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub running: bool,
}

pub struct Supervisor {
    binary_path: PathBuf,
    child: Option<Child>,
    handle: Option<ProcessHandle>,
}

impl Supervisor {
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            child: None,
            handle: None,
        }
    }

    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    /// Repoint the supervisor at a different `tor` executable, e.g. once the
    /// binary provisioner resolves an external override or a `PATH` binary
    /// instead of the managed path this supervisor was constructed with.
    /// Ignored while a child is tracked — the running child keeps its own path.
    pub fn set_binary_path(&mut self, binary_path: PathBuf) {
        if self.child.is_none() {
            self.binary_path = binary_path;
        }
    }

    /// Spawn `tor -f <torrc>`, capture stdout/stderr into `tracing`, and wait for
    /// `Bootstrapped 100%` on stdout within `bootstrap_timeout`. On timeout the
    /// child is killed and `ProcessError::StartTimeout` is returned.
    pub async fn start(
        &mut self,
        torrc_path: &Path,
        bootstrap_timeout: Duration,
    ) -> Result<(), ProcessError> {
        if self.child.is_some() {
            return Err(ProcessError::AlreadyRunning);
        }
        if !self.binary_path.is_file() {
            return Err(ProcessError::BinaryMissing);
        }

        info!(torrc = %torrc_path.display(), "starting Tor process");
        let mut child = Command::new(&self.binary_path)
            .arg("-f")
            .arg(torrc_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ProcessError::SpawnFailed)?;

        let pid = child.id().ok_or(ProcessError::StartTimeout)?;
        let stdout = child.stdout.take().expect("stdout was piped");

        let wait_for_bootstrap = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(line, "tor stdout");
                if line.contains("Bootstrapped 100%") {
                    return Ok(());
                }
            }
            Err(ProcessError::UnexpectedExit(None))
        };

        match timeout(bootstrap_timeout, wait_for_bootstrap).await {
            Ok(Ok(())) => {
                self.child = Some(child);
                self.handle = Some(ProcessHandle {
                    pid,
                    started_at: Utc::now(),
                    running: true,
                });
                info!(pid, "tor bootstrapped");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = child.start_kill();
                Err(e)
            }
            Err(_) => {
                let _ = child.start_kill();
                Err(ProcessError::StartTimeout)
            }
        }
    }

    /// Idempotent: returns `Ok(())` immediately if no child is tracked. This is the
    /// raw-OS-signal fallback path used when the control port itself is
    /// unreachable; the facade prefers `SIGNAL SHUTDOWN` over the control port and
    /// only reaches for this when that connection fails (§4.6). Sends a graceful
    /// signal first, then waits up to `drain_timeout` before escalating to a hard
    /// kill.
    pub async fn stop(&mut self, drain_timeout: Duration) -> Result<(), ProcessError> {
        let Some(mut child) = self.child.take() else {
            if let Some(handle) = self.handle.as_mut() {
                handle.running = false;
            }
            return Ok(());
        };

        if let Some(pid) = child.id() {
            if let Err(e) = send_graceful_signal(pid) {
                warn!(pid, error = %e, "graceful signal failed, escalating to hard kill");
            }
        }

        let waited = timeout(drain_timeout, child.wait()).await;
        match waited {
            Ok(Ok(_status)) => {}
            _ => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }

        if let Some(handle) = self.handle.as_mut() {
            handle.running = false;
        }
        Ok(())
    }

    /// Wait for the tracked child to exit on its own within `drain_timeout`,
    /// without sending it any signal. Used after the caller has already asked Tor
    /// to shut down via the control port. Returns `true` if the child exited (or
    /// none was tracked), `false` if it was still running when the timeout
    /// elapsed.
    pub async fn wait_for_exit(&mut self, drain_timeout: Duration) -> Result<bool, ProcessError> {
        let Some(child) = self.child.as_mut() else {
            if let Some(handle) = self.handle.as_mut() {
                handle.running = false;
            }
            return Ok(true);
        };

        match timeout(drain_timeout, child.wait()).await {
            Ok(Ok(_status)) => {
                self.child = None;
                if let Some(handle) = self.handle.as_mut() {
                    handle.running = false;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Immediately hard-kill the tracked child, bypassing any grace period.
    pub async fn force_stop(&mut self) -> Result<(), ProcessError> {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        if let Some(handle) = self.handle.as_mut() {
            handle.running = false;
        }
        Ok(())
    }

    /// Ground-truth liveness: the tracked PID exists and its executable path still
    /// matches the managed binary.
    pub fn is_running(&mut self) -> bool {
        let Some(handle) = self.handle.as_ref() else {
            return false;
        };
        let mut system = System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All);
        let running = system
            .process(sysinfo::Pid::from_u32(handle.pid))
            .and_then(|p| p.exe())
            .map(|exe| exe == self.binary_path)
            .unwrap_or(false);

        if let Some(handle) = self.handle.as_mut() {
            handle.running = running;
        }
        running
    }

    /// Enumerate local processes whose executable path exactly matches the managed
    /// binary and send them a termination signal. The safe default: it will not
    /// disturb an unrelated `tor` installation at a different path.
    pub fn terminate_all_tor_processes(&self) -> usize {
        let mut system = System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All);
        let mut count = 0;
        for (pid, process) in system.processes() {
            if process.exe() == Some(self.binary_path.as_path()) {
                process.kill();
                count += 1;
                warn!(pid = pid.as_u32(), "terminated stray tor process");
            }
        }
        count
    }

    /// Deliberately indiscriminate: matches by process name alone (`tor`/`tor.exe`),
    /// catching Tor installations this supervisor never started. Never called
    /// internally; callers opt in explicitly.
    pub fn terminate_all_tor_processes_unchecked(&self) -> usize {
        let target_name = if cfg!(windows) { "tor.exe" } else { "tor" };
        let mut system = System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All);
        let mut count = 0;
        for (pid, process) in system.processes() {
            if process.name().to_string_lossy() == target_name {
                process.kill();
                count += 1;
                warn!(pid = pid.as_u32(), "terminated tor process (unchecked match)");
            }
        }
        count
    }
}

#[cfg(unix)]
fn send_graceful_signal(pid: u32) -> std::io::Result<()> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_graceful_signal(_pid: u32) -> std::io::Result<()> {
    // Windows has no SIGTERM equivalent reachable without extra dependencies;
    // the caller's subsequent hard-kill escalation covers this platform.
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "graceful termination is not supported on this platform",
    ))
}
