//! Launches and reaps the generator subprocess.
//!
//! The generator is a cooperating peer that cannot be trusted for liveness:
//! it may hang, crash, or wedge mid-protocol. Every wait here is bounded,
//! and `Drop` force-kills anything still alive so a session can never leak
//! a child process.

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::channel::{COMMANDS_ENV, RESULTS_ENV};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn generator {binary:?}: {source}")]
    Spawn {
        binary: PathBuf,
        source: io::Error,
    },
    #[error("generator exited abnormally: {0}")]
    NonZeroExit(String),
    #[error("generator did not exit within {0:?} of being killed")]
    Unresponsive(Duration),
    #[error("failed waiting on generator: {0}")]
    Wait(#[from] io::Error),
}

/// Explicit launch configuration: channel roles are mapped to concrete paths
/// here and injected into the child's environment, rather than inherited
/// from ambient process state.
pub struct SupervisorConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub artifact_path: PathBuf,
    pub commands_path: PathBuf,
    pub results_path: PathBuf,
    pub shutdown_timeout: Duration,
}

/// Owns the spawned generator process for one session.
pub struct Supervisor {
    child: Option<Child>,
    shutdown_timeout: Duration,
}

impl Supervisor {
    /// Spawns `<binary> [args..] -o <artifact>` with the channel paths in the
    /// environment and stdout/stderr discarded — the generator's only
    /// observable outputs are the artifact file and the commands channel.
    pub fn start(config: &SupervisorConfig) -> Result<Self, SupervisorError> {
        let child = Command::new(&config.binary)
            .args(&config.args)
            .arg("-o")
            .arg(&config.artifact_path)
            .env(COMMANDS_ENV, &config.commands_path)
            .env(RESULTS_ENV, &config.results_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                binary: config.binary.clone(),
                source,
            })?;
        Ok(Self {
            child: Some(child),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    fn wait_with_timeout(
        child: &mut Child,
        timeout: Duration,
    ) -> Result<Option<ExitStatus>, io::Error> {
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if start.elapsed() > timeout {
                return Ok(None);
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Two-phase shutdown: wait up to the configured bound for a natural
    /// exit, then kill and wait again. Only a zero exit status is success.
    /// Idempotent, and a no-op success when the child was never started or
    /// has already been reaped.
    pub fn shutdown(&mut self) -> Result<(), SupervisorError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = match Self::wait_with_timeout(&mut child, self.shutdown_timeout)? {
            Some(status) => status,
            None => {
                if let Err(e) = child.kill() {
                    eprintln!("Failed to kill unresponsive generator: {e}");
                }
                match Self::wait_with_timeout(&mut child, self.shutdown_timeout)? {
                    Some(status) => status,
                    None => {
                        // Unreaped; put it back so Drop gets another chance.
                        self.child = Some(child);
                        return Err(SupervisorError::Unresponsive(self.shutdown_timeout));
                    }
                }
            }
        };
        if status.success() {
            Ok(())
        } else {
            Err(SupervisorError::NonZeroExit(describe_status(&status)))
        }
    }

    /// Reaps the child without a grace period, reporting its exit status.
    /// Used when the commands channel closed unexpectedly and the child has
    /// most likely already exited.
    pub fn reap(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        if let Some(status) = Self::wait_with_timeout(&mut child, self.shutdown_timeout)? {
            return Ok(Some(status));
        }
        let _ = child.kill();
        let status = child.wait()?;
        Ok(Some(status))
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                eprintln!("Failed to kill generator during teardown: {e}");
            }
            let _ = child.wait();
        }
    }
}

/// Human-readable exit description, including the signal on unix.
pub fn describe_status(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {signal}");
        }
    }
    "exited abnormally".to_string()
}
