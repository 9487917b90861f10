//! Domain entities. Pure data structures for the core business.
//!
//! No device/IO types here — these are mapped from adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// An attached (or recently detached) phone. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub udid: String,
    pub name: String,
    pub connection_state: ConnectionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// A single message extracted from a backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable id from the source database; duplicate-detection key.
    pub external_id: String,
    pub conversation_id: String,
    pub sender: Option<String>,
    /// Unix seconds.
    pub sent_at: i64,
    pub body: String,
    pub is_from_me: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub external_id: String,
    pub display_name: String,
    pub phone_numbers: Vec<String>,
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub external_id: String,
    pub display_name: Option<String>,
    pub participant_count: u32,
    /// Unix seconds of the newest message, if known.
    pub last_activity: Option<i64>,
}

/// On-disk backup produced by acquisition. Consumed by decryptor and parser.
///
/// `verified_password` is set once verification succeeds and must never be
/// logged; `Debug` redacts it.
#[derive(Clone)]
pub struct BackupArchive {
    pub path: PathBuf,
    pub encrypted: bool,
    pub verified_password: Option<String>,
}

impl fmt::Debug for BackupArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupArchive")
            .field("path", &self.path)
            .field("encrypted", &self.encrypted)
            .field(
                "verified_password",
                &self.verified_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Everything extracted from one archive. Immutable once produced; handed
/// once to the persistence writer.
#[derive(Debug, Clone, Default)]
pub struct ParsedResult {
    pub messages: Vec<Message>,
    pub contacts: Vec<Contact>,
    pub conversations: Vec<Conversation>,
    /// Malformed/truncated source rows that were skipped rather than aborting.
    pub skipped_records: usize,
    pub duration_ms: u64,
}

/// Outcome of one persistence run. Skipped counts are idempotent re-imports
/// (duplicates), not failures.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PersistResult {
    pub messages_stored: u64,
    pub messages_skipped: u64,
    pub contacts_stored: u64,
    pub contacts_skipped: u64,
    pub conversations_stored: u64,
    pub conversations_skipped: u64,
    pub duration_ms: u64,
}

/// Phases of the sync state machine. Idle is both initial and terminal-reentrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPhase {
    Idle,
    Acquiring,
    AwaitingPassword,
    AwaitingPasscode,
    Decrypting,
    Parsing,
    Storing,
    Complete,
    Error,
}

impl SyncPhase {
    /// A session exists and has not reached a terminal phase.
    pub fn is_running(self) -> bool {
        !matches!(self, SyncPhase::Idle | SyncPhase::Complete | SyncPhase::Error)
    }

    /// Suspension points with unbounded wall-clock duration (human interaction).
    /// Exempt from stuck detection.
    pub fn is_awaiting_input(self) -> bool {
        matches!(self, SyncPhase::AwaitingPassword | SyncPhase::AwaitingPasscode)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Acquiring => "acquiring",
            SyncPhase::AwaitingPassword => "awaiting-password",
            SyncPhase::AwaitingPasscode => "awaiting-passcode",
            SyncPhase::Decrypting => "decrypting",
            SyncPhase::Parsing => "parsing",
            SyncPhase::Storing => "storing",
            SyncPhase::Complete => "complete",
            SyncPhase::Error => "error",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller identity captured at sync start. All rows written during the session
/// carry it, regardless of later identity changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(pub String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options for one sync request. A password on a session suspended in
/// AwaitingPassword resumes that session.
#[derive(Clone, Default)]
pub struct SyncOptions {
    pub udid: String,
    pub password: Option<String>,
    pub force_full_backup: bool,
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("udid", &self.udid)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("force_full_backup", &self.force_full_backup)
            .finish()
    }
}

/// Outcome returned to the caller of `sync`/`process_existing`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub message_count: usize,
    pub contact_count: usize,
    pub conversation_count: usize,
    pub duration_ms: u64,
    /// Expected rejection: cooldown not yet elapsed. Not an error.
    pub rate_limited: bool,
    pub remaining_ms: Option<u64>,
    /// Session is suspended waiting for a password; call again with one.
    pub awaiting_password: bool,
    /// Password was wrong; session still suspended for a re-prompt.
    pub password_invalid: bool,
    pub cancelled: bool,
    pub error: Option<String>,
}

impl SyncReport {
    pub fn completed(
        message_count: usize,
        contact_count: usize,
        conversation_count: usize,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: true,
            message_count,
            contact_count,
            conversation_count,
            duration_ms,
            ..Self::default()
        }
    }

    pub fn failed(error: String, duration_ms: u64) -> Self {
        Self {
            error: Some(error),
            duration_ms,
            ..Self::default()
        }
    }

    pub fn rate_limited(remaining_ms: u64) -> Self {
        Self {
            rate_limited: true,
            remaining_ms: Some(remaining_ms),
            error: Some(format!("rate limited: retry in {remaining_ms} ms")),
            ..Self::default()
        }
    }

    pub fn awaiting_password() -> Self {
        Self {
            awaiting_password: true,
            error: Some("backup is encrypted, password required".into()),
            ..Self::default()
        }
    }

    pub fn password_invalid() -> Self {
        Self {
            awaiting_password: true,
            password_invalid: true,
            error: Some("backup password is invalid".into()),
            ..Self::default()
        }
    }

    pub fn cancelled(duration_ms: u64) -> Self {
        Self {
            cancelled: true,
            duration_ms,
            error: Some("cancelled by user".into()),
            ..Self::default()
        }
    }
}

/// Point-in-time orchestrator status. Cheap to query, never blocked by an
/// in-flight pipeline.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SyncStatus {
    pub is_running: bool,
    pub phase: SyncPhase,
}

/// Orchestrator status combined with device-detection state.
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedStatus {
    pub is_running: bool,
    pub phase: SyncPhase,
    pub session_udid: Option<String>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub detection_running: bool,
    pub connected_devices: usize,
    pub last_report: Option<SyncReport>,
}

/// Events streamed to the single UI subscriber over a bounded channel.
/// Bulk payloads are summarized as counts, never transmitted in full.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    Progress {
        phase: SyncPhase,
        percent: u8,
        message: String,
    },
    Phase {
        phase: SyncPhase,
    },
    DeviceConnected {
        device: Device,
    },
    DeviceDisconnected {
        udid: String,
    },
    PasswordRequired {
        udid: String,
    },
    WaitingForPasscode {
        udid: String,
    },
    PasscodeEntered {
        udid: String,
    },
    Error {
        message: String,
    },
    Complete {
        success: bool,
        error: Option<String>,
        message_count: usize,
        contact_count: usize,
        conversation_count: usize,
    },
    StorageComplete {
        messages_stored: u64,
        contacts_stored: u64,
        conversations_stored: u64,
        duration_ms: u64,
    },
    StorageError {
        error: String,
    },
}
