//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{
    BackupArchive, Contact, Conversation, Device, Identity, Message, ParsedResult, SyncError,
};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Cooperative cancellation flag shared between the orchestrator and stages.
/// Stages poll it at safe points (per record chunk, per batch) and abort promptly.
pub type CancelFlag = Arc<AtomicBool>;

/// Events emitted by an in-flight acquisition, forwarded by the orchestrator
/// into the UI stream.
#[derive(Debug, Clone)]
pub enum AcquireEvent {
    Progress { percent: u8, message: String },
    /// First-time pairing: the user must enter a passcode on the device itself.
    PasscodeRequired,
    PasscodeAccepted,
}

/// Device communication gateway. Lists attached devices and runs backups.
///
/// The wire protocol stays opaque behind this trait; adapters normalize tool
/// output into the archive layout under `adapters::backup`.
#[async_trait::async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Point-in-time snapshot of attached devices.
    async fn list_devices(&self) -> Result<Vec<Device>, SyncError>;

    /// Whether backups from this device are encrypted (password verification
    /// will be required before the archive is usable).
    async fn check_encryption(&self, udid: &str) -> Result<bool, SyncError>;

    /// Run a backup of `udid` into `dest`. Emits `AcquireEvent`s while running
    /// and polls `cancel` between units of work.
    async fn acquire_backup(
        &self,
        udid: &str,
        dest: &Path,
        force_full: bool,
        events: mpsc::Sender<AcquireEvent>,
        cancel: CancelFlag,
    ) -> Result<BackupArchive, SyncError>;
}

/// Archive password verification and decryption. Fails closed: a wrong
/// password is the distinguishable `PasswordInvalid` outcome, never a
/// generic error.
#[async_trait::async_trait]
pub trait ArchiveCrypto: Send + Sync {
    /// Check `password` against the archive's verifier blob. Must not mutate
    /// the archive or touch payload files.
    async fn verify_password(&self, archive_dir: &Path, password: &str)
        -> Result<bool, SyncError>;

    /// Decrypt the archive's payload files in place. The password must have
    /// been verified first.
    async fn decrypt(&self, archive_dir: &Path, password: &str) -> Result<(), SyncError>;
}

/// Parses an acquired (and decrypted) archive into domain records.
#[async_trait::async_trait]
pub trait BackupParser: Send + Sync {
    /// Streams records out of the archive databases. Malformed rows are
    /// skipped and counted, not fatal. Polls `cancel` between chunks.
    async fn parse(
        &self,
        archive: &BackupArchive,
        cancel: CancelFlag,
    ) -> Result<ParsedResult, SyncError>;

    /// Open an already-acquired archive on disk (reprocessing without
    /// re-triggering hardware).
    async fn open_existing(&self, dir: &Path) -> Result<BackupArchive, SyncError>;
}

/// Rows affected by one stored batch. `skipped` are idempotent duplicates.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOutcome {
    pub stored: u64,
    pub skipped: u64,
}

/// Destination store for parsed records (the application database).
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn store_messages(
        &self,
        identity: &Identity,
        batch: &[Message],
    ) -> Result<BatchOutcome, SyncError>;

    async fn store_contacts(
        &self,
        identity: &Identity,
        batch: &[Contact],
    ) -> Result<BatchOutcome, SyncError>;

    async fn store_conversations(
        &self,
        identity: &Identity,
        batch: &[Conversation],
    ) -> Result<BatchOutcome, SyncError>;
}

/// Supplies the caller identity bound to a session at sync start. Replaces any
/// ambient "current user" global: the orchestrator reads it exactly once per
/// session.
pub trait IdentitySource: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
}
