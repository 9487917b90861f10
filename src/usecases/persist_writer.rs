//! Streams a parsed result into the record store in batches.
//!
//! - One store call (one transaction) per batch: partial progress already
//!   committed survives a mid-import failure.
//! - Progress is reported per batch, not per record, to avoid flooding the
//!   UI channel.
//! - Duplicate external ids are skipped by the store, so re-running a sync
//!   against already-stored data increments skip counts only.

use crate::domain::{Identity, ParsedResult, PersistResult, SyncError};
use crate::ports::{CancelFlag, RecordStore};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Sub-progress during persistence, forwarded at batch cadence.
///
/// `current`/`total` count records of the kind currently being written;
/// `percent` is computed over all record kinds combined so it never decreases
/// across the conversations → contacts → messages sequence.
#[derive(Debug, Clone, Copy)]
pub struct PersistProgress {
    pub phase: &'static str,
    pub current: usize,
    pub total: usize,
    pub percent: u8,
}

pub struct PersistWriter {
    store: Arc<dyn RecordStore>,
    batch_size: usize,
}

impl PersistWriter {
    pub fn new(store: Arc<dyn RecordStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Write all records under `identity`. Polls `cancel` before each batch;
    /// a cancelled run leaves batches already committed in place and returns
    /// `Cancelled` without touching the rest.
    pub async fn persist<F>(
        &self,
        identity: &Identity,
        parsed: &ParsedResult,
        cancel: &CancelFlag,
        mut on_progress: F,
    ) -> Result<PersistResult, SyncError>
    where
        F: FnMut(PersistProgress) + Send,
    {
        let started = Instant::now();
        let mut result = PersistResult::default();
        let overall_total =
            parsed.conversations.len() + parsed.contacts.len() + parsed.messages.len();
        let mut overall_done = 0usize;

        // Conversations and contacts first so messages land against known rows.
        let total = parsed.conversations.len();
        let mut done = 0usize;
        for batch in parsed.conversations.chunks(self.batch_size) {
            Self::ensure_live(cancel)?;
            let outcome = self.store.store_conversations(identity, batch).await?;
            result.conversations_stored += outcome.stored;
            result.conversations_skipped += outcome.skipped;
            done += batch.len();
            overall_done += batch.len();
            on_progress(Self::progress(
                "conversations",
                done,
                total,
                overall_done,
                overall_total,
            ));
        }

        let total = parsed.contacts.len();
        let mut done = 0usize;
        for batch in parsed.contacts.chunks(self.batch_size) {
            Self::ensure_live(cancel)?;
            let outcome = self.store.store_contacts(identity, batch).await?;
            result.contacts_stored += outcome.stored;
            result.contacts_skipped += outcome.skipped;
            done += batch.len();
            overall_done += batch.len();
            on_progress(Self::progress(
                "contacts",
                done,
                total,
                overall_done,
                overall_total,
            ));
        }

        let total = parsed.messages.len();
        let mut done = 0usize;
        for batch in parsed.messages.chunks(self.batch_size) {
            Self::ensure_live(cancel)?;
            let outcome = self.store.store_messages(identity, batch).await?;
            result.messages_stored += outcome.stored;
            result.messages_skipped += outcome.skipped;
            done += batch.len();
            overall_done += batch.len();
            on_progress(Self::progress(
                "messages",
                done,
                total,
                overall_done,
                overall_total,
            ));
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            identity = %identity,
            messages_stored = result.messages_stored,
            messages_skipped = result.messages_skipped,
            contacts_stored = result.contacts_stored,
            contacts_skipped = result.contacts_skipped,
            duration_ms = result.duration_ms,
            "persist complete"
        );
        Ok(result)
    }

    fn ensure_live(cancel: &CancelFlag) -> Result<(), SyncError> {
        if cancel.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    fn progress(
        phase: &'static str,
        current: usize,
        total: usize,
        overall_done: usize,
        overall_total: usize,
    ) -> PersistProgress {
        let percent = if overall_total == 0 {
            100
        } else {
            ((overall_done * 100) / overall_total).min(100) as u8
        };
        PersistProgress {
            phase,
            current,
            total,
            percent,
        }
    }
}
