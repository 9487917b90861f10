//! Domain layer: entities and errors.
//!
//! Pure data, no IO. Adapters map their infrastructure types into these.

pub mod entities;
pub mod errors;

pub use entities::{
    BackupArchive, ConnectionState, Contact, Conversation, Device, Identity, Message,
    ParsedResult, PersistResult, SyncEvent, SyncOptions, SyncPhase, SyncReport, SyncStatus,
    UnifiedStatus,
};
pub use errors::SyncError;
