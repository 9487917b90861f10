//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Another session is live and not stuck. Caller must cancel/reset first.
    #[error("a sync is already running (phase: {phase})")]
    AlreadyRunning { phase: String },

    /// Expected rejection, not a failure: retry after `remaining_ms`.
    #[error("rate limited: retry in {remaining_ms} ms")]
    RateLimited { remaining_ms: u64 },

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Backup is encrypted and no password was supplied. The session suspends
    /// in AwaitingPassword; a follow-up sync call carrying the password resumes it.
    #[error("backup is encrypted, password required")]
    PasswordRequired,

    /// Wrong password. Recoverable: the session stays in AwaitingPassword for a re-prompt.
    #[error("backup password is invalid")]
    PasswordInvalid,

    #[error("timed out waiting for on-device passcode entry")]
    PasscodeTimeout,

    #[error("backup archive corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("parse failed: {0}")]
    Parse(String),

    /// User-requested cancellation. Never surfaced as an error event.
    #[error("cancelled by user")]
    Cancelled,

    /// Data was acquired and parsed but could not be saved. Reported separately
    /// from acquisition/parsing failures since remediation differs.
    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("device gateway error: {0}")]
    Gateway(String),

    #[error("configuration error: {0}")]
    Config(String),
}
