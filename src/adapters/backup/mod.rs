//! Backup archive adapters: the normalized on-disk layout, password-based
//! encryption, and the record parser.

pub mod archive;
pub mod crypto;
pub mod parser;

pub use archive::{ArchiveBuilder, ArchiveManifest};
pub use crypto::ArchiveCipher;
pub use parser::SqliteBackupParser;
