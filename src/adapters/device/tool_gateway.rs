//! Device gateway backed by external backup tooling (libimobiledevice-style
//! binaries).
//!
//! The listing tool prints one udid per line. The backup tool writes a
//! normalized archive into the destination directory and reports progress on
//! stdout with a small line protocol:
//!
//! ```text
//! PROGRESS <percent> <message...>
//! PASSCODE-REQUIRED
//! PASSCODE-OK
//! ```
//!
//! Anything else on stdout is ignored; stderr is logged at debug level.

use crate::adapters::backup::archive::ArchiveManifest;
use crate::domain::{BackupArchive, ConnectionState, Device, SyncError};
use crate::ports::{AcquireEvent, CancelFlag, DeviceGateway};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How often the cancel flag is polled while the backup tool runs.
const CANCEL_POLL: Duration = Duration::from_millis(250);

pub struct BackupToolGateway {
    list_tool: PathBuf,
    backup_tool: PathBuf,
}

impl BackupToolGateway {
    pub fn new(list_tool: impl Into<PathBuf>, backup_tool: impl Into<PathBuf>) -> Self {
        Self {
            list_tool: list_tool.into(),
            backup_tool: backup_tool.into(),
        }
    }
}

/// One stdout line from the backup tool, decoded.
pub(crate) fn parse_tool_line(line: &str) -> Option<AcquireEvent> {
    let line = line.trim();
    if line == "PASSCODE-REQUIRED" {
        return Some(AcquireEvent::PasscodeRequired);
    }
    if line == "PASSCODE-OK" {
        return Some(AcquireEvent::PasscodeAccepted);
    }
    let rest = line.strip_prefix("PROGRESS ")?;
    let (pct, message) = match rest.split_once(' ') {
        Some((pct, msg)) => (pct, msg),
        None => (rest, ""),
    };
    let percent: u8 = pct.parse::<u16>().ok()?.min(100) as u8;
    Some(AcquireEvent::Progress {
        percent,
        message: message.to_string(),
    })
}

/// One line of listing-tool output. Tools print `<udid>` or `<udid> <name...>`.
pub(crate) fn parse_device_line(line: &str) -> Option<Device> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (udid, name) = match line.split_once(' ') {
        Some((udid, name)) => (udid, name.trim()),
        None => (line, ""),
    };
    Some(Device {
        udid: udid.to_string(),
        name: if name.is_empty() {
            udid.to_string()
        } else {
            name.to_string()
        },
        connection_state: ConnectionState::Connected,
    })
}

#[async_trait]
impl DeviceGateway for BackupToolGateway {
    async fn list_devices(&self) -> Result<Vec<Device>, SyncError> {
        let output = Command::new(&self.list_tool)
            .arg("-l")
            .output()
            .await
            .map_err(|e| SyncError::Gateway(format!("{}: {e}", self.list_tool.display())))?;
        if !output.status.success() {
            return Err(SyncError::Gateway(format!(
                "{} exited with {}",
                self.list_tool.display(),
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(parse_device_line).collect())
    }

    async fn check_encryption(&self, udid: &str) -> Result<bool, SyncError> {
        let output = Command::new(&self.backup_tool)
            .args(["encryption", "status", "-u", udid])
            .output()
            .await
            .map_err(|e| SyncError::Gateway(format!("{}: {e}", self.backup_tool.display())))?;
        if !output.status.success() {
            return Err(SyncError::Gateway(format!(
                "encryption status check failed for {udid}: {}",
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.to_ascii_lowercase().contains("on"))
    }

    async fn acquire_backup(
        &self,
        udid: &str,
        dest: &Path,
        force_full: bool,
        events: mpsc::Sender<AcquireEvent>,
        cancel: CancelFlag,
    ) -> Result<BackupArchive, SyncError> {
        std::fs::create_dir_all(dest)
            .map_err(|e| SyncError::Gateway(format!("create {}: {e}", dest.display())))?;

        let mut cmd = Command::new(&self.backup_tool);
        cmd.arg("backup").args(["-u", udid]).arg(dest);
        if force_full {
            cmd.arg("--full");
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        info!(udid, dest = %dest.display(), force_full, "starting backup tool");

        let mut child = cmd
            .spawn()
            .map_err(|e| SyncError::Gateway(format!("{}: {e}", self.backup_tool.display())))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::Gateway("backup tool stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SyncError::Gateway("backup tool stderr unavailable".into()))?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line, "backup tool stderr");
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let status = loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(event) = parse_tool_line(&line) {
                                let _ = events.send(event).await;
                            }
                        }
                        // stdout closed; wait for exit.
                        Ok(None) => {
                            break child.wait().await.map_err(|e| {
                                SyncError::Gateway(format!("backup tool wait: {e}"))
                            })?;
                        }
                        Err(e) => {
                            let _ = child.kill().await;
                            return Err(SyncError::Gateway(format!("backup tool stdout: {e}")));
                        }
                    }
                }
                _ = tokio::time::sleep(CANCEL_POLL) => {
                    if cancel.load(Ordering::Relaxed) {
                        warn!(udid, "cancelling backup tool");
                        let _ = child.kill().await;
                        return Err(SyncError::Cancelled);
                    }
                }
            }
        };

        if cancel.load(Ordering::Relaxed) {
            return Err(SyncError::Cancelled);
        }
        if !status.success() {
            return Err(SyncError::Gateway(format!(
                "backup tool exited with {status} for {udid}"
            )));
        }

        ArchiveManifest::open(dest)
    }
}
