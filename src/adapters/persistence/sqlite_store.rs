//! SQLite-backed record store via libsql. Implements RecordStore with
//! idempotent batch inserts.
//!
//! One database file (app.db) holds every record kind. Primary keys are
//! (identity, external_id) so re-importing the same backup — or importing it
//! under a different identity — behaves predictably: duplicates are skipped
//! and counted, never overwritten.

use crate::domain::{Contact, Conversation, Identity, Message, SyncError};
use crate::ports::{BatchOutcome, RecordStore};
use libsql::{Database, params};
use std::path::{Path, PathBuf};
use tracing::info;

const MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    identity TEXT NOT NULL,
    external_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    sender TEXT,
    sent_at INTEGER NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    is_from_me INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (identity, external_id)
)"#;
const MESSAGES_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_messages_conversation \
     ON messages (identity, conversation_id, sent_at DESC)";

const CONTACTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    identity TEXT NOT NULL,
    external_id TEXT NOT NULL,
    display_name TEXT NOT NULL DEFAULT '',
    phones_json TEXT,
    emails_json TEXT,
    PRIMARY KEY (identity, external_id)
)"#;

const CONVERSATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    identity TEXT NOT NULL,
    external_id TEXT NOT NULL,
    display_name TEXT,
    participant_count INTEGER NOT NULL DEFAULT 0,
    last_activity INTEGER,
    PRIMARY KEY (identity, external_id)
)"#;

/// Application database. One file (app.db) in the given base directory.
pub struct SqliteStore {
    db: Database,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Connect to (or create) the database and ensure the schema exists.
    /// Call once at startup; the returned store is safe to share via Arc.
    ///
    /// WAL mode allows status queries to read while a sync run writes.
    pub async fn connect(base_dir: impl AsRef<Path>) -> Result<Self, SyncError> {
        let base = base_dir.as_ref();
        std::fs::create_dir_all(base).map_err(|e| SyncError::Persistence(e.to_string()))?;
        let db_path = base.join("app.db");
        let path_str = db_path.to_string_lossy();
        let db = libsql::Builder::new_local(path_str.as_ref())
            .build()
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        let conn = db.connect().map_err(|e| SyncError::Persistence(e.to_string()))?;

        // PRAGMA returns a row (the new value); use query and consume rows
        // (execute fails when rows are returned).
        for pragma in ["PRAGMA journal_mode=WAL", "PRAGMA synchronous=NORMAL"] {
            let mut rows = conn
                .query(pragma, ())
                .await
                .map_err(|e| SyncError::Persistence(format!("{pragma} failed: {e}")))?;
            while rows
                .next()
                .await
                .map_err(|e| SyncError::Persistence(e.to_string()))?
                .is_some()
            {}
        }

        for ddl in [
            MESSAGES_TABLE,
            MESSAGES_INDEX,
            CONTACTS_TABLE,
            CONVERSATIONS_TABLE,
        ] {
            conn.execute(ddl, ())
                .await
                .map_err(|e| SyncError::Persistence(e.to_string()))?;
        }

        info!(path = %db_path.display(), "application database connected with WAL mode");

        Ok(Self { db, db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<libsql::Connection, SyncError> {
        self.db
            .connect()
            .map_err(|e| SyncError::Persistence(e.to_string()))
    }
}

#[async_trait::async_trait]
impl RecordStore for SqliteStore {
    async fn store_messages(
        &self,
        identity: &Identity,
        batch: &[Message],
    ) -> Result<BatchOutcome, SyncError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let conn = self.conn()?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        let mut outcome = BatchOutcome::default();
        for m in batch {
            let affected = tx
                .execute(
                    r#"
                    INSERT INTO messages
                        (identity, external_id, conversation_id, sender, sent_at, body, is_from_me)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT (identity, external_id) DO NOTHING
                    "#,
                    params![
                        identity.as_str(),
                        m.external_id.as_str(),
                        m.conversation_id.as_str(),
                        m.sender.clone(),
                        m.sent_at,
                        m.body.as_str(),
                        i64::from(m.is_from_me)
                    ],
                )
                .await
                .map_err(|e| SyncError::Persistence(e.to_string()))?;
            if affected > 0 {
                outcome.stored += 1;
            } else {
                outcome.skipped += 1;
            }
        }
        tx.commit()
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        Ok(outcome)
    }

    async fn store_contacts(
        &self,
        identity: &Identity,
        batch: &[Contact],
    ) -> Result<BatchOutcome, SyncError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let conn = self.conn()?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        let mut outcome = BatchOutcome::default();
        for c in batch {
            let phones = serde_json::to_string(&c.phone_numbers).ok();
            let emails = serde_json::to_string(&c.emails).ok();
            let affected = tx
                .execute(
                    r#"
                    INSERT INTO contacts
                        (identity, external_id, display_name, phones_json, emails_json)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT (identity, external_id) DO NOTHING
                    "#,
                    params![
                        identity.as_str(),
                        c.external_id.as_str(),
                        c.display_name.as_str(),
                        phones,
                        emails
                    ],
                )
                .await
                .map_err(|e| SyncError::Persistence(e.to_string()))?;
            if affected > 0 {
                outcome.stored += 1;
            } else {
                outcome.skipped += 1;
            }
        }
        tx.commit()
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        Ok(outcome)
    }

    async fn store_conversations(
        &self,
        identity: &Identity,
        batch: &[Conversation],
    ) -> Result<BatchOutcome, SyncError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let conn = self.conn()?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        let mut outcome = BatchOutcome::default();
        for c in batch {
            let affected = tx
                .execute(
                    r#"
                    INSERT INTO conversations
                        (identity, external_id, display_name, participant_count, last_activity)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT (identity, external_id) DO NOTHING
                    "#,
                    params![
                        identity.as_str(),
                        c.external_id.as_str(),
                        c.display_name.clone(),
                        i64::from(c.participant_count),
                        c.last_activity
                    ],
                )
                .await
                .map_err(|e| SyncError::Persistence(e.to_string()))?;
            if affected > 0 {
                outcome.stored += 1;
            } else {
                outcome.skipped += 1;
            }
        }
        tx.commit()
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> Message {
        Message {
            external_id: id.into(),
            conversation_id: "conv-1".into(),
            sender: None,
            sent_at: 1_700_000_000,
            body: "hi".into(),
            is_from_me: false,
        }
    }

    #[tokio::test]
    async fn duplicate_messages_are_skipped_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(dir.path()).await.unwrap();
        let identity = Identity("user-a".into());

        let first = store
            .store_messages(&identity, &[msg("m1"), msg("m2")])
            .await
            .unwrap();
        assert_eq!(first.stored, 2);
        assert_eq!(first.skipped, 0);

        let second = store
            .store_messages(&identity, &[msg("m1"), msg("m2"), msg("m3")])
            .await
            .unwrap();
        assert_eq!(second.stored, 1);
        assert_eq!(second.skipped, 2);
    }

    #[tokio::test]
    async fn identities_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(dir.path()).await.unwrap();

        let a = store
            .store_messages(&Identity("user-a".into()), &[msg("m1")])
            .await
            .unwrap();
        let b = store
            .store_messages(&Identity("user-b".into()), &[msg("m1")])
            .await
            .unwrap();
        assert_eq!(a.stored, 1);
        assert_eq!(b.stored, 1);
    }

    #[tokio::test]
    async fn contacts_and_conversations_roundtrip_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(dir.path()).await.unwrap();
        let identity = Identity("user-a".into());

        let contact = Contact {
            external_id: "c1".into(),
            display_name: "Alice".into(),
            phone_numbers: vec!["+15550001111".into()],
            emails: vec!["alice@example.com".into()],
        };
        let conversation = Conversation {
            external_id: "conv-1".into(),
            display_name: Some("Family".into()),
            participant_count: 3,
            last_activity: Some(1_700_000_100),
        };

        let c = store
            .store_contacts(&identity, std::slice::from_ref(&contact))
            .await
            .unwrap();
        assert_eq!((c.stored, c.skipped), (1, 0));
        let c = store
            .store_contacts(&identity, std::slice::from_ref(&contact))
            .await
            .unwrap();
        assert_eq!((c.stored, c.skipped), (0, 1));

        let v = store
            .store_conversations(&identity, std::slice::from_ref(&conversation))
            .await
            .unwrap();
        assert_eq!((v.stored, v.skipped), (1, 0));
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(dir.path()).await.unwrap();
        let outcome = store
            .store_messages(&Identity("user-a".into()), &[])
            .await
            .unwrap();
        assert_eq!((outcome.stored, outcome.skipped), (0, 0));
    }
}
