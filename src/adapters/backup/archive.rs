//! Normalized backup archive layout.
//!
//! The device wire protocol stays opaque; every gateway normalizes its output
//! into this layout, which is the contract between acquisition and parsing:
//!
//! ```text
//! <archive dir>/
//!   manifest.json     archive metadata, KDF params + password verifier
//!   messages.db       SQLite: conversations + messages  (or messages.db.enc)
//!   contacts.db       SQLite: contacts                  (or contacts.db.enc)
//! ```

use crate::adapters::backup::crypto;
use crate::domain::{BackupArchive, Contact, Conversation, Message, SyncError};
use chrono::{DateTime, Utc};
use libsql::params;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_NAME: &str = "manifest.json";
pub const MESSAGES_DB: &str = "messages.db";
pub const CONTACTS_DB: &str = "contacts.db";
/// Suffix for encrypted payload files.
pub const ENC_SUFFIX: &str = ".enc";

pub(crate) const CONVERSATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    guid TEXT,
    display_name TEXT,
    participant_count INTEGER NOT NULL DEFAULT 0,
    last_activity INTEGER
)"#;

pub(crate) const MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    guid TEXT,
    conversation_guid TEXT,
    sender TEXT,
    sent_at INTEGER,
    body TEXT,
    is_from_me INTEGER NOT NULL DEFAULT 0
)"#;

pub(crate) const CONTACTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    guid TEXT,
    display_name TEXT,
    phones TEXT,
    emails TEXT
)"#;

/// Argon2id parameters for the archive key. Stored alongside the salt so older
/// archives stay decryptable if defaults change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub salt_b64: String,
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveFile {
    pub name: String,
    pub encrypted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub udid: String,
    pub device_name: String,
    pub created_at: DateTime<Utc>,
    pub encrypted: bool,
    /// Present iff `encrypted`.
    pub kdf: Option<KdfParams>,
    /// Sealed known-plaintext blob; wrong passwords fail here, before any
    /// payload file is touched.
    pub verifier_b64: Option<String>,
    pub files: Vec<ArchiveFile>,
}

impl ArchiveManifest {
    pub fn load(dir: &Path) -> Result<Self, SyncError> {
        let path = dir.join(MANIFEST_NAME);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            SyncError::ArchiveCorrupt(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| SyncError::ArchiveCorrupt(format!("manifest invalid: {e}")))
    }

    pub fn save(&self, dir: &Path) -> Result<(), SyncError> {
        let path = dir.join(MANIFEST_NAME);
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::ArchiveCorrupt(format!("manifest encode: {e}")))?;
        std::fs::write(&path, raw).map_err(|e| {
            SyncError::ArchiveCorrupt(format!("cannot write {}: {e}", path.display()))
        })
    }

    /// The archive handle for a manifest already on disk.
    pub fn open(dir: &Path) -> Result<BackupArchive, SyncError> {
        let manifest = Self::load(dir)?;
        Ok(BackupArchive {
            path: dir.to_path_buf(),
            encrypted: manifest.encrypted,
            verified_password: None,
        })
    }
}

/// Writes a complete archive from in-memory records. Used by the mock gateway
/// and by tests to fabricate device backups.
pub struct ArchiveBuilder {
    dir: PathBuf,
    udid: String,
    device_name: String,
    password: Option<String>,
    kdf_m_cost: u32,
    kdf_t_cost: u32,
    kdf_p_cost: u32,
    messages: Vec<Message>,
    contacts: Vec<Contact>,
    conversations: Vec<Conversation>,
}

impl ArchiveBuilder {
    pub fn new(dir: impl Into<PathBuf>, udid: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            udid: udid.into(),
            device_name: device_name.into(),
            password: None,
            kdf_m_cost: crypto::DEFAULT_M_COST,
            kdf_t_cost: crypto::DEFAULT_T_COST,
            kdf_p_cost: crypto::DEFAULT_P_COST,
            messages: Vec::new(),
            contacts: Vec::new(),
            conversations: Vec::new(),
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Override KDF cost. The mock gateway and tests use light parameters to
    /// keep interactive flows fast.
    pub fn kdf_cost(mut self, m_cost: u32, t_cost: u32, p_cost: u32) -> Self {
        self.kdf_m_cost = m_cost;
        self.kdf_t_cost = t_cost;
        self.kdf_p_cost = p_cost;
        self
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn contacts(mut self, contacts: Vec<Contact>) -> Self {
        self.contacts = contacts;
        self
    }

    pub fn conversations(mut self, conversations: Vec<Conversation>) -> Self {
        self.conversations = conversations;
        self
    }

    pub async fn write(self) -> Result<BackupArchive, SyncError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| SyncError::Gateway(format!("create archive dir: {e}")))?;
        // Start clean: stale payloads from a prior run would double up rows.
        for name in [MESSAGES_DB, CONTACTS_DB] {
            let _ = std::fs::remove_file(self.dir.join(name));
            let _ = std::fs::remove_file(self.dir.join(format!("{name}{ENC_SUFFIX}")));
        }

        self.write_messages_db().await?;
        self.write_contacts_db().await?;

        let encrypted = self.password.is_some();
        let (kdf, verifier_b64) = match &self.password {
            Some(password) => {
                let kdf = KdfParams {
                    salt_b64: crypto::generate_salt(),
                    m_cost: self.kdf_m_cost,
                    t_cost: self.kdf_t_cost,
                    p_cost: self.kdf_p_cost,
                };
                let key = crypto::derive_key(password, &kdf)?;
                for name in [MESSAGES_DB, CONTACTS_DB] {
                    let plain = self.dir.join(name);
                    let sealed = self.dir.join(format!("{name}{ENC_SUFFIX}"));
                    crypto::encrypt_file(&key, &plain, &sealed)?;
                    std::fs::remove_file(&plain)
                        .map_err(|e| SyncError::Gateway(format!("remove plaintext: {e}")))?;
                }
                (Some(kdf), Some(crypto::seal_verifier(&key)?))
            }
            None => (None, None),
        };

        let manifest = ArchiveManifest {
            udid: self.udid.clone(),
            device_name: self.device_name.clone(),
            created_at: Utc::now(),
            encrypted,
            kdf,
            verifier_b64,
            files: vec![
                ArchiveFile {
                    name: MESSAGES_DB.into(),
                    encrypted,
                },
                ArchiveFile {
                    name: CONTACTS_DB.into(),
                    encrypted,
                },
            ],
        };
        manifest.save(&self.dir)?;

        Ok(BackupArchive {
            path: self.dir,
            encrypted,
            verified_password: None,
        })
    }

    async fn write_messages_db(&self) -> Result<(), SyncError> {
        let path = self.dir.join(MESSAGES_DB);
        let conn = open_db(&path).await?;
        conn.execute(CONVERSATIONS_TABLE, ())
            .await
            .map_err(|e| SyncError::Gateway(e.to_string()))?;
        conn.execute(MESSAGES_TABLE, ())
            .await
            .map_err(|e| SyncError::Gateway(e.to_string()))?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| SyncError::Gateway(e.to_string()))?;
        for c in &self.conversations {
            tx.execute(
                "INSERT INTO conversations (guid, display_name, participant_count, last_activity) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    c.external_id.as_str(),
                    c.display_name.clone(),
                    i64::from(c.participant_count),
                    c.last_activity
                ],
            )
            .await
            .map_err(|e| SyncError::Gateway(e.to_string()))?;
        }
        for m in &self.messages {
            tx.execute(
                "INSERT INTO messages (guid, conversation_guid, sender, sent_at, body, is_from_me) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    m.external_id.as_str(),
                    m.conversation_id.as_str(),
                    m.sender.clone(),
                    m.sent_at,
                    m.body.as_str(),
                    i64::from(m.is_from_me)
                ],
            )
            .await
            .map_err(|e| SyncError::Gateway(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| SyncError::Gateway(e.to_string()))
    }

    async fn write_contacts_db(&self) -> Result<(), SyncError> {
        let path = self.dir.join(CONTACTS_DB);
        let conn = open_db(&path).await?;
        conn.execute(CONTACTS_TABLE, ())
            .await
            .map_err(|e| SyncError::Gateway(e.to_string()))?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| SyncError::Gateway(e.to_string()))?;
        for c in &self.contacts {
            let phones = serde_json::to_string(&c.phone_numbers).unwrap_or_default();
            let emails = serde_json::to_string(&c.emails).unwrap_or_default();
            tx.execute(
                "INSERT INTO contacts (guid, display_name, phones, emails) VALUES (?1, ?2, ?3, ?4)",
                params![
                    c.external_id.as_str(),
                    c.display_name.as_str(),
                    phones,
                    emails
                ],
            )
            .await
            .map_err(|e| SyncError::Gateway(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| SyncError::Gateway(e.to_string()))
    }
}

pub(crate) async fn open_db(path: &Path) -> Result<libsql::Connection, SyncError> {
    let db = libsql::Builder::new_local(path.to_string_lossy().as_ref())
        .build()
        .await
        .map_err(|e| SyncError::ArchiveCorrupt(format!("{}: {e}", path.display())))?;
    db.connect()
        .map_err(|e| SyncError::ArchiveCorrupt(format!("{}: {e}", path.display())))
}
