//! Background daemon running the sync scheduler and the counting ping.
//!
//! Runs in the foreground until SIGINT/SIGTERM; a PID file lets `daemon stop`
//! and `daemon status` find it.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::app::{AppContext, Result, SyncError};
use crate::config::format_interval;

/// How often the settings file is checked for edits made by other processes.
pub const SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Daemon runner
pub struct Daemon {
    ctx: Arc<AppContext>,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Get the PID file path
    pub fn pid_file_path() -> Option<PathBuf> {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join("filtersync").join("daemon.pid"))
    }

    /// Check if another daemon is already running
    pub fn is_running() -> bool {
        Self::running_pid().is_some()
    }

    fn running_pid() -> Option<u32> {
        let pid_path = Self::pid_file_path()?;
        let pid = fs::read_to_string(pid_path).ok()?.trim().parse::<u32>().ok()?;
        Self::process_exists(pid).then_some(pid)
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn write_pid_file(&self) -> std::io::Result<()> {
        if let Some(pid_path) = Self::pid_file_path() {
            if let Some(parent) = pid_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&pid_path)?;
            writeln!(file, "{}", std::process::id())?;
        }
        Ok(())
    }

    fn remove_pid_file(&self) {
        if let Some(pid_path) = Self::pid_file_path() {
            let _ = fs::remove_file(pid_path);
        }
    }

    /// Cancels the shared token on SIGINT/SIGTERM.
    fn spawn_signal_handler(&self) {
        let cancel = self.ctx.cancel.clone();

        #[cfg(unix)]
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(e), _) | (_, Err(e)) => {
                        error!("Failed to set up signal handlers: {}", e);
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
            cancel.cancel();
        });

        #[cfg(windows)]
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        });
    }

    /// Run the daemon until a shutdown signal arrives.
    pub async fn run(&self) -> Result<()> {
        if Self::is_running() {
            return Err(SyncError::Other(
                "Another daemon instance is already running".to_string(),
            ));
        }

        self.write_pid_file()
            .map_err(|e| SyncError::Other(format!("Failed to write PID file: {}", e)))?;
        self.spawn_signal_handler();

        info!(
            "filtersync daemon started (sync every {}, PID: {})",
            format_interval(self.ctx.config.sync.periodic_interval),
            std::process::id()
        );

        let result = self.run_services().await;

        info!("Daemon shutting down...");
        self.remove_pid_file();
        result
    }

    async fn run_services(&self) -> Result<()> {
        let scheduler = &self.ctx.scheduler;
        scheduler.initialize()?;

        let telemetry = async {
            if self.ctx.config.telemetry.enabled {
                self.ctx.telemetry.run().await;
            } else {
                debug!("User counting disabled");
            }
        };

        tokio::join!(scheduler.run(), telemetry, self.poll_settings());
        Ok(())
    }

    /// Picks up settings written by CLI invocations in other processes.
    async fn poll_settings(&self) {
        let mut timer = tokio::time::interval(SETTINGS_POLL_INTERVAL);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => return,
                _ = timer.tick() => {}
            }
            match self.ctx.settings.reload() {
                Ok(true) => debug!("Settings changed on disk"),
                Ok(false) => {}
                Err(e) => warn!("Could not reload settings: {}", e),
            }
        }
    }
}

/// Stop a running daemon by reading PID file and sending signal
pub fn stop_daemon() -> std::result::Result<(), String> {
    let pid_path =
        Daemon::pid_file_path().ok_or_else(|| "Could not determine PID file path".to_string())?;

    if !pid_path.exists() {
        return Err("No daemon is running (PID file not found)".to_string());
    }

    let pid_str =
        fs::read_to_string(&pid_path).map_err(|e| format!("Failed to read PID file: {}", e))?;

    let pid: u32 = pid_str
        .trim()
        .parse()
        .map_err(|_| "Invalid PID in PID file".to_string())?;

    #[cfg(unix)]
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .map_err(|e| format!("Failed to send signal: {}", e))?;

    #[cfg(windows)]
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status()
        .map_err(|e| format!("Failed to stop process: {}", e))?;

    if status.success() {
        let _ = fs::remove_file(&pid_path);
        Ok(())
    } else {
        Err(format!("Failed to stop daemon (PID {})", pid))
    }
}

/// Check daemon status
pub fn daemon_status() -> String {
    match Daemon::running_pid() {
        Some(pid) => format!("Daemon is running (PID: {})", pid),
        None => match Daemon::pid_file_path() {
            Some(path) if path.exists() => "Daemon is not running (stale PID file)".to_string(),
            _ => "Daemon is not running".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_lives_under_filtersync() {
        if let Some(path) = Daemon::pid_file_path() {
            assert!(path.ends_with("filtersync/daemon.pid"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_own_process_exists() {
        assert!(Daemon::process_exists(std::process::id()));
    }
}
