//! Tolerant record extraction from a normalized archive.
//!
//! Source databases come off real phones and real backup tools; individual
//! rows can be truncated or null where they should not be. A malformed row is
//! skipped and counted, never fatal. Only structural problems (missing
//! databases, unreadable schema) abort the parse.

use crate::adapters::backup::archive::{ArchiveManifest, CONTACTS_DB, MESSAGES_DB, open_db};
use crate::domain::{BackupArchive, Contact, Conversation, Message, ParsedResult, SyncError};
use crate::ports::{BackupParser, CancelFlag};
use async_trait::async_trait;
use libsql::Connection;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, warn};

/// Parses the archive's SQLite databases into domain records.
pub struct SqliteBackupParser {
    /// Rows between cancellation checks.
    chunk_size: usize,
}

impl SqliteBackupParser {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    async fn parse_conversations(
        &self,
        conn: &Connection,
        cancel: &CancelFlag,
        skipped: &mut usize,
    ) -> Result<Vec<Conversation>, SyncError> {
        let mut rows = conn
            .query(
                "SELECT guid, display_name, participant_count, last_activity FROM conversations",
                (),
            )
            .await
            .map_err(|e| SyncError::Parse(format!("conversations query: {e}")))?;

        let mut out = Vec::new();
        let mut seen = 0usize;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SyncError::Parse(format!("conversations row: {e}")))?
        {
            seen += 1;
            if seen % self.chunk_size == 0 && cancel.load(Ordering::Relaxed) {
                return Err(SyncError::Cancelled);
            }
            let guid: Option<String> = row.get(0).ok();
            let Some(guid) = guid.filter(|g| !g.is_empty()) else {
                *skipped += 1;
                continue;
            };
            out.push(Conversation {
                external_id: guid,
                display_name: row.get::<Option<String>>(1).ok().flatten(),
                participant_count: row
                    .get::<Option<i64>>(2)
                    .ok()
                    .flatten()
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(0),
                last_activity: row.get::<Option<i64>>(3).ok().flatten(),
            });
        }
        Ok(out)
    }

    async fn parse_messages(
        &self,
        conn: &Connection,
        cancel: &CancelFlag,
        skipped: &mut usize,
    ) -> Result<Vec<Message>, SyncError> {
        let mut rows = conn
            .query(
                "SELECT guid, conversation_guid, sender, sent_at, body, is_from_me FROM messages",
                (),
            )
            .await
            .map_err(|e| SyncError::Parse(format!("messages query: {e}")))?;

        let mut out = Vec::new();
        let mut seen = 0usize;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SyncError::Parse(format!("messages row: {e}")))?
        {
            seen += 1;
            if seen % self.chunk_size == 0 && cancel.load(Ordering::Relaxed) {
                return Err(SyncError::Cancelled);
            }
            let guid: Option<String> = row.get(0).ok();
            let conversation: Option<String> = row.get(1).ok();
            let (Some(guid), Some(conversation)) = (
                guid.filter(|g| !g.is_empty()),
                conversation.filter(|c| !c.is_empty()),
            ) else {
                *skipped += 1;
                continue;
            };
            out.push(Message {
                external_id: guid,
                conversation_id: conversation,
                sender: row.get::<Option<String>>(2).ok().flatten(),
                sent_at: row.get::<Option<i64>>(3).ok().flatten().unwrap_or(0),
                body: row
                    .get::<Option<String>>(4)
                    .ok()
                    .flatten()
                    .unwrap_or_default(),
                is_from_me: row.get::<Option<i64>>(5).ok().flatten().unwrap_or(0) != 0,
            });
        }
        Ok(out)
    }

    async fn parse_contacts(
        &self,
        conn: &Connection,
        cancel: &CancelFlag,
        skipped: &mut usize,
    ) -> Result<Vec<Contact>, SyncError> {
        let mut rows = conn
            .query("SELECT guid, display_name, phones, emails FROM contacts", ())
            .await
            .map_err(|e| SyncError::Parse(format!("contacts query: {e}")))?;

        let mut out = Vec::new();
        let mut seen = 0usize;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SyncError::Parse(format!("contacts row: {e}")))?
        {
            seen += 1;
            if seen % self.chunk_size == 0 && cancel.load(Ordering::Relaxed) {
                return Err(SyncError::Cancelled);
            }
            let guid: Option<String> = row.get(0).ok();
            let Some(guid) = guid.filter(|g| !g.is_empty()) else {
                *skipped += 1;
                continue;
            };
            out.push(Contact {
                external_id: guid,
                display_name: row
                    .get::<Option<String>>(1)
                    .ok()
                    .flatten()
                    .unwrap_or_default(),
                phone_numbers: decode_string_list(row.get::<Option<String>>(2).ok().flatten()),
                emails: decode_string_list(row.get::<Option<String>>(3).ok().flatten()),
            });
        }
        Ok(out)
    }
}

/// Lists are stored as JSON arrays of strings; anything else degrades to empty.
fn decode_string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

#[async_trait]
impl BackupParser for SqliteBackupParser {
    async fn parse(
        &self,
        archive: &BackupArchive,
        cancel: CancelFlag,
    ) -> Result<ParsedResult, SyncError> {
        if archive.encrypted {
            return Err(SyncError::ArchiveCorrupt(
                "archive is still encrypted".into(),
            ));
        }
        let started = Instant::now();
        let mut skipped = 0usize;

        let messages_path = archive.path.join(MESSAGES_DB);
        if !messages_path.exists() {
            return Err(SyncError::ArchiveCorrupt(format!(
                "{} missing from archive",
                MESSAGES_DB
            )));
        }
        let conn = open_db(&messages_path).await?;
        let conversations = self.parse_conversations(&conn, &cancel, &mut skipped).await?;
        let messages = self.parse_messages(&conn, &cancel, &mut skipped).await?;

        // Contacts are best-effort: some devices produce backups without an
        // address book database.
        let contacts_path = archive.path.join(CONTACTS_DB);
        let contacts = if contacts_path.exists() {
            let conn = open_db(&contacts_path).await?;
            self.parse_contacts(&conn, &cancel, &mut skipped).await?
        } else {
            warn!(archive = %archive.path.display(), "contacts database missing, continuing without contacts");
            Vec::new()
        };

        if cancel.load(Ordering::Relaxed) {
            return Err(SyncError::Cancelled);
        }

        debug!(
            messages = messages.len(),
            contacts = contacts.len(),
            conversations = conversations.len(),
            skipped,
            "archive parsed"
        );
        Ok(ParsedResult {
            messages,
            contacts,
            conversations,
            skipped_records: skipped,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn open_existing(&self, dir: &Path) -> Result<BackupArchive, SyncError> {
        let archive = ArchiveManifest::open(dir)?;
        debug!(archive = %dir.display(), encrypted = archive.encrypted, "opened existing archive");
        Ok(archive)
    }
}
