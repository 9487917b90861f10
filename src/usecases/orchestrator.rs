//! The sync state machine. Owns the single session, drives acquisition →
//! decryption → parsing → persistence, and streams typed events to the UI
//! channel.
//!
//! - At most one session is in a non-terminal phase at any time.
//! - Password/passcode prompts are resumable suspension points, not blocked
//!   threads: `sync` returns with the session parked in an Awaiting phase and
//!   a follow-up call carrying the password resumes it.
//! - The caller identity is captured once at admission and is immutable for
//!   the session.
//! - A stale session (no phase transition past the stuck threshold) is
//!   force-reset by the next `sync` call before proceeding.

use crate::domain::{
    BackupArchive, Identity, ParsedResult, PersistResult, SyncError, SyncEvent, SyncOptions,
    SyncPhase, SyncReport, SyncStatus, UnifiedStatus,
};
use crate::ports::{
    AcquireEvent, ArchiveCrypto, BackupParser, CancelFlag, DeviceGateway, IdentitySource,
};
use crate::usecases::persist_writer::PersistWriter;
use crate::usecases::rate_limiter::{RateDecision, RateLimiter};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

const OP_SYNC: &str = "sync";
const OP_PROCESS_EXISTING: &str = "process-existing";

/// Stuck guard as a pure function of session state and clock: a session is
/// stuck when it is pipeline-executing (not a human-interaction suspension)
/// and has made no phase transition within `threshold`.
pub fn is_stuck(
    phase: SyncPhase,
    last_transition: Instant,
    now: Instant,
    threshold: Duration,
) -> bool {
    phase.is_running()
        && !phase.is_awaiting_input()
        && now.saturating_duration_since(last_transition) > threshold
}

/// Mutable session state. Exclusively owned by the orchestrator; the mutex is
/// held only for transitions so `status` stays responsive while a pipeline or
/// suspension is in flight.
struct SessionState {
    phase: SyncPhase,
    udid: Option<String>,
    started_at: Option<DateTime<Utc>>,
    last_transition: Instant,
    bound_identity: Option<Identity>,
    /// Retained across an AwaitingPassword suspension so a resume does not
    /// re-trigger hardware.
    archive: Option<BackupArchive>,
    cancel: CancelFlag,
    /// Incremented on every session start and reset. A pipeline task holding
    /// an older generation may no longer mutate state.
    generation: u64,
    last_report: Option<SyncReport>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SyncPhase::Idle,
            udid: None,
            started_at: None,
            last_transition: Instant::now(),
            bound_identity: None,
            archive: None,
            cancel: Arc::new(AtomicBool::new(false)),
            generation: 0,
            last_report: None,
        }
    }
}

enum Admission {
    Rejected(SyncReport),
    Begin {
        generation: u64,
        identity: Identity,
        cancel: CancelFlag,
        resume_archive: Option<BackupArchive>,
        forced_reset: bool,
    },
}

pub struct SyncOrchestrator {
    gateway: Arc<dyn DeviceGateway>,
    crypto: Arc<dyn ArchiveCrypto>,
    parser: Arc<dyn BackupParser>,
    writer: PersistWriter,
    identity_source: Arc<dyn IdentitySource>,
    events: mpsc::Sender<SyncEvent>,
    limiter: RateLimiter,
    backup_root: PathBuf,
    stuck_threshold: Duration,
    session: Mutex<SessionState>,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn DeviceGateway>,
        crypto: Arc<dyn ArchiveCrypto>,
        parser: Arc<dyn BackupParser>,
        writer: PersistWriter,
        identity_source: Arc<dyn IdentitySource>,
        events: mpsc::Sender<SyncEvent>,
        backup_root: PathBuf,
        cooldown: Duration,
        stuck_threshold: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            crypto,
            parser,
            writer,
            identity_source,
            events,
            limiter: RateLimiter::new(cooldown),
            backup_root,
            stuck_threshold,
            session: Mutex::new(SessionState::new()),
        })
    }

    /// Run (or resume) a sync for a device. Rejections and suspensions are
    /// encoded in the report; the orchestrator is back in Idle after any
    /// terminal outcome so a retry never needs an explicit reset.
    pub async fn sync(&self, options: SyncOptions) -> SyncReport {
        let started = Instant::now();
        let admission = self.admit(
            &options.udid,
            options.password.is_some(),
            OP_SYNC,
            SyncPhase::Acquiring,
        );
        let (generation, identity, cancel, resume_archive, forced_reset) = match admission {
            Admission::Rejected(report) => return report,
            Admission::Begin {
                generation,
                identity,
                cancel,
                resume_archive,
                forced_reset,
            } => (generation, identity, cancel, resume_archive, forced_reset),
        };
        if forced_reset {
            self.emit(SyncEvent::Phase {
                phase: SyncPhase::Idle,
            })
            .await;
        }
        info!(udid = %options.udid, identity = %identity, "sync session started");
        let outcome = self
            .run_pipeline(generation, &options, &identity, &cancel, resume_archive, false)
            .await;
        self.finish(generation, &options.udid, started, outcome).await
    }

    /// Same pipeline as `sync` minus acquisition: reprocess the archive
    /// already on disk for this device.
    pub async fn process_existing(&self, udid: &str, password: Option<String>) -> SyncReport {
        let started = Instant::now();
        let options = SyncOptions {
            udid: udid.to_string(),
            password,
            force_full_backup: false,
        };
        let admission = self.admit(
            udid,
            options.password.is_some(),
            OP_PROCESS_EXISTING,
            SyncPhase::Parsing,
        );
        let (generation, identity, cancel, resume_archive, forced_reset) = match admission {
            Admission::Rejected(report) => return report,
            Admission::Begin {
                generation,
                identity,
                cancel,
                resume_archive,
                forced_reset,
            } => (generation, identity, cancel, resume_archive, forced_reset),
        };
        if forced_reset {
            self.emit(SyncEvent::Phase {
                phase: SyncPhase::Idle,
            })
            .await;
        }
        info!(udid, identity = %identity, "reprocessing existing backup");
        let outcome = self
            .run_pipeline(generation, &options, &identity, &cancel, resume_archive, true)
            .await;
        self.finish(generation, udid, started, outcome).await
    }

    /// Request cooperative cancellation. Pipeline stages poll the flag at safe
    /// points; a session parked in AwaitingPassword has no task to poll it and
    /// is reset directly.
    pub async fn cancel(&self) {
        let reset_now = {
            let mut state = self.lock_session();
            if !state.phase.is_running() {
                return;
            }
            info!(phase = %state.phase, "cancellation requested");
            state.cancel.store(true, Ordering::SeqCst);
            if state.phase == SyncPhase::AwaitingPassword {
                Self::reset_locked(&mut state);
                true
            } else {
                false
            }
        };
        if reset_now {
            self.emit(SyncEvent::Phase {
                phase: SyncPhase::Idle,
            })
            .await;
        }
    }

    /// Unconditionally return to Idle, clearing in-flight session state. Used
    /// for stuck-state recovery and explicit user-triggered recovery. Safe to
    /// call when nothing is running.
    pub async fn force_reset(&self) {
        {
            let mut state = self.lock_session();
            if state.phase.is_running() {
                warn!(phase = %state.phase, "force reset of live session");
                state.cancel.store(true, Ordering::SeqCst);
            }
            Self::reset_locked(&mut state);
        }
        self.emit(SyncEvent::Phase {
            phase: SyncPhase::Idle,
        })
        .await;
    }

    /// Cheap point-in-time status; never blocked by an in-flight pipeline.
    pub fn status(&self) -> SyncStatus {
        let state = self.lock_session();
        SyncStatus {
            is_running: state.phase.is_running(),
            phase: state.phase,
        }
    }

    /// Status plus session metadata and the last terminal report.
    pub fn status_detail(&self) -> UnifiedStatus {
        let state = self.lock_session();
        UnifiedStatus {
            is_running: state.phase.is_running(),
            phase: state.phase,
            session_udid: state.udid.clone(),
            session_started_at: state.started_at,
            detection_running: false,
            connected_devices: 0,
            last_report: state.last_report.clone(),
        }
    }

    // ── admission ───────────────────────────────────────────────────────────

    fn admit(
        &self,
        udid: &str,
        has_password: bool,
        operation: &'static str,
        initial_phase: SyncPhase,
    ) -> Admission {
        let mut state = self.lock_session();

        // Resume: a password arriving for the suspended session continues it,
        // bypassing the rate limiter. Identity stays the one bound at start.
        if state.phase == SyncPhase::AwaitingPassword && state.udid.as_deref() == Some(udid) {
            if !has_password {
                return Admission::Rejected(SyncReport::awaiting_password());
            }
            let Some(identity) = state.bound_identity.clone() else {
                Self::reset_locked(&mut state);
                return Admission::Rejected(SyncReport::failed(
                    "suspended session lost its identity".into(),
                    0,
                ));
            };
            state.phase = if state.archive.is_some() {
                SyncPhase::Decrypting
            } else {
                initial_phase
            };
            state.last_transition = Instant::now();
            return Admission::Begin {
                generation: state.generation,
                identity,
                cancel: state.cancel.clone(),
                resume_archive: state.archive.clone(),
                forced_reset: false,
            };
        }

        // Rate limiting is decided before anything else so a limited caller
        // cannot disturb a session that is still making progress.
        if let RateDecision::Limited { remaining } = self.limiter.check(operation, udid) {
            return Admission::Rejected(SyncReport::rate_limited(remaining.as_millis() as u64));
        }

        let mut forced_reset = false;
        if state.phase.is_running() {
            if is_stuck(
                state.phase,
                state.last_transition,
                Instant::now(),
                self.stuck_threshold,
            ) {
                warn!(phase = %state.phase, udid = ?state.udid, "prior session stuck, force-resetting");
                state.cancel.store(true, Ordering::SeqCst);
                Self::reset_locked(&mut state);
                forced_reset = true;
            } else {
                let err = SyncError::AlreadyRunning {
                    phase: state.phase.to_string(),
                };
                return Admission::Rejected(SyncReport::failed(err.to_string(), 0));
            }
        }

        // Identity is captured here, atomically with session creation, and
        // never re-read: a login change mid-sync must not re-home the data.
        let Some(identity) = self.identity_source.current_identity() else {
            return Admission::Rejected(SyncReport::failed("no active identity".into(), 0));
        };

        self.limiter.record(operation, udid);
        state.generation += 1;
        state.phase = initial_phase;
        state.udid = Some(udid.to_string());
        state.started_at = Some(Utc::now());
        state.last_transition = Instant::now();
        state.bound_identity = Some(identity.clone());
        state.archive = None;
        state.cancel = Arc::new(AtomicBool::new(false));
        Admission::Begin {
            generation: state.generation,
            identity,
            cancel: state.cancel.clone(),
            resume_archive: None,
            forced_reset,
        }
    }

    // ── pipeline ────────────────────────────────────────────────────────────

    async fn run_pipeline(
        &self,
        generation: u64,
        options: &SyncOptions,
        identity: &Identity,
        cancel: &CancelFlag,
        resume_archive: Option<BackupArchive>,
        skip_acquisition: bool,
    ) -> Result<(ParsedResult, PersistResult), SyncError> {
        let udid = options.udid.as_str();

        let mut archive = match resume_archive {
            Some(archive) => archive,
            None if skip_acquisition => {
                let dir = self.backup_root.join(udid);
                self.parser.open_existing(&dir).await?
            }
            None => {
                self.acquire(generation, udid, options.force_full_backup, cancel, options.password.is_some())
                    .await?
            }
        };

        if archive.encrypted && archive.verified_password.is_none() {
            let Some(password) = options.password.clone() else {
                return Err(self
                    .suspend_awaiting_password(generation, udid, Some(archive), false)
                    .await);
            };
            self.set_phase(generation, SyncPhase::Decrypting).await?;
            self.emit_progress(SyncPhase::Decrypting, 42, "verifying backup password");
            if !self.crypto.verify_password(&archive.path, &password).await? {
                info!(udid, "backup password rejected");
                return Err(self
                    .suspend_awaiting_password(generation, udid, Some(archive), true)
                    .await);
            }
            if let Err(err) = self.crypto.decrypt(&archive.path, &password).await {
                // A decryptor that only discovers the bad password mid-stream
                // must still park the session for a re-prompt.
                return Err(match err {
                    SyncError::PasswordInvalid => {
                        info!(udid, "backup password rejected during decryption");
                        self.suspend_awaiting_password(generation, udid, Some(archive), true)
                            .await
                    }
                    other => other,
                });
            }
            archive.verified_password = Some(password);
            self.emit_progress(SyncPhase::Decrypting, 50, "backup decrypted");
        }

        ensure_live(cancel)?;
        self.set_phase(generation, SyncPhase::Parsing).await?;
        self.emit_progress(SyncPhase::Parsing, 55, "parsing backup records");
        let parsed = self.parser.parse(&archive, cancel.clone()).await?;
        self.emit_progress(
            SyncPhase::Parsing,
            75,
            format!(
                "parsed {} messages, {} contacts, {} conversations ({} skipped)",
                parsed.messages.len(),
                parsed.contacts.len(),
                parsed.conversations.len(),
                parsed.skipped_records
            ),
        );

        // A cancel between parsing and storing must persist nothing.
        ensure_live(cancel)?;
        self.set_phase(generation, SyncPhase::Storing).await?;
        let persisted = self
            .writer
            .persist(identity, &parsed, cancel, |p| {
                self.touch(generation);
                // Storing owns the 75..100 band of overall progress.
                let percent = 75 + (u16::from(p.percent) * 25 / 100) as u8;
                let _ = self.events.try_send(SyncEvent::Progress {
                    phase: SyncPhase::Storing,
                    percent,
                    message: format!("storing {}: {}/{}", p.phase, p.current, p.total),
                });
            })
            .await
            .map_err(|e| match e {
                SyncError::Cancelled => SyncError::Cancelled,
                other => SyncError::Persistence(other.to_string()),
            })?;

        Ok((parsed, persisted))
    }

    async fn acquire(
        &self,
        generation: u64,
        udid: &str,
        force_full: bool,
        cancel: &CancelFlag,
        has_password: bool,
    ) -> Result<BackupArchive, SyncError> {
        self.set_phase(generation, SyncPhase::Acquiring).await?;

        let devices = self.gateway.list_devices().await?;
        if !devices.iter().any(|d| d.udid == udid) {
            return Err(SyncError::DeviceUnavailable(format!(
                "device {udid} is not connected"
            )));
        }

        // An encrypted backup needs a password eventually; suspend before
        // spending an acquisition when none was provided.
        if !has_password && self.gateway.check_encryption(udid).await? {
            return Err(self
                .suspend_awaiting_password(generation, udid, None, false)
                .await);
        }

        let dest = self.backup_root.join(udid);
        let (tx, mut rx) = mpsc::channel::<AcquireEvent>(32);
        let acquisition = self
            .gateway
            .acquire_backup(udid, &dest, force_full, tx, cancel.clone());
        let forward = async {
            while let Some(event) = rx.recv().await {
                self.handle_acquire_event(generation, udid, event).await?;
            }
            Ok::<(), SyncError>(())
        };
        let (archive, forwarded) = tokio::join!(acquisition, forward);
        forwarded?;
        let archive = archive?;
        self.emit_progress(SyncPhase::Acquiring, 40, "backup acquired");
        Ok(archive)
    }

    async fn handle_acquire_event(
        &self,
        generation: u64,
        udid: &str,
        event: AcquireEvent,
    ) -> Result<(), SyncError> {
        match event {
            AcquireEvent::Progress { percent, message } => {
                self.touch(generation);
                // Acquisition owns the 0..40 band of overall progress.
                let scaled = (u16::from(percent.min(100)) * 40 / 100) as u8;
                self.emit_progress(SyncPhase::Acquiring, scaled, message);
            }
            AcquireEvent::PasscodeRequired => {
                self.set_phase(generation, SyncPhase::AwaitingPasscode).await?;
                self.emit(SyncEvent::WaitingForPasscode {
                    udid: udid.to_string(),
                })
                .await;
            }
            AcquireEvent::PasscodeAccepted => {
                self.emit(SyncEvent::PasscodeEntered {
                    udid: udid.to_string(),
                })
                .await;
                self.set_phase(generation, SyncPhase::Acquiring).await?;
            }
        }
        Ok(())
    }

    // ── completion ──────────────────────────────────────────────────────────

    async fn finish(
        &self,
        generation: u64,
        udid: &str,
        started: Instant,
        outcome: Result<(ParsedResult, PersistResult), SyncError>,
    ) -> SyncReport {
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok((parsed, persisted)) => {
                let _ = self.set_phase(generation, SyncPhase::Complete).await;
                self.emit(SyncEvent::Complete {
                    success: true,
                    error: None,
                    message_count: parsed.messages.len(),
                    contact_count: parsed.contacts.len(),
                    conversation_count: parsed.conversations.len(),
                })
                .await;
                self.emit(SyncEvent::StorageComplete {
                    messages_stored: persisted.messages_stored,
                    contacts_stored: persisted.contacts_stored,
                    conversations_stored: persisted.conversations_stored,
                    duration_ms: persisted.duration_ms,
                })
                .await;
                info!(
                    udid,
                    messages = parsed.messages.len(),
                    contacts = parsed.contacts.len(),
                    conversations = parsed.conversations.len(),
                    skipped = parsed.skipped_records,
                    duration_ms,
                    "sync complete"
                );
                let report = SyncReport::completed(
                    parsed.messages.len(),
                    parsed.contacts.len(),
                    parsed.conversations.len(),
                    duration_ms,
                );
                self.conclude(generation, report.clone()).await;
                report
            }
            // Session stays parked in AwaitingPassword; no reset.
            Err(SyncError::PasswordRequired) => SyncReport::awaiting_password(),
            Err(SyncError::PasswordInvalid) => SyncReport::password_invalid(),
            Err(SyncError::Cancelled) => {
                info!(udid, duration_ms, "sync cancelled");
                let report = SyncReport::cancelled(duration_ms);
                self.conclude(generation, report.clone()).await;
                report
            }
            Err(err) => {
                let message = err.to_string();
                warn!(udid, error = %message, duration_ms, "sync failed");
                let _ = self.set_phase(generation, SyncPhase::Error).await;
                // The terminal outcome goes out first; the detail event follows.
                self.emit(SyncEvent::Complete {
                    success: false,
                    error: Some(message.clone()),
                    message_count: 0,
                    contact_count: 0,
                    conversation_count: 0,
                })
                .await;
                if matches!(err, SyncError::Persistence(_)) {
                    self.emit(SyncEvent::StorageError {
                        error: message.clone(),
                    })
                    .await;
                } else {
                    self.emit(SyncEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                }
                let report = SyncReport::failed(message, duration_ms);
                self.conclude(generation, report.clone()).await;
                report
            }
        }
    }

    /// Record the terminal report and return to Idle, unless a newer session
    /// already took over.
    async fn conclude(&self, generation: u64, report: SyncReport) {
        let reset = {
            let mut state = self.lock_session();
            if state.generation == generation {
                state.last_report = Some(report);
                Self::reset_locked(&mut state);
                true
            } else {
                false
            }
        };
        if reset {
            self.emit(SyncEvent::Phase {
                phase: SyncPhase::Idle,
            })
            .await;
        }
    }

    // ── state helpers ───────────────────────────────────────────────────────

    fn lock_session(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn reset_locked(state: &mut SessionState) {
        state.phase = SyncPhase::Idle;
        state.udid = None;
        state.started_at = None;
        state.bound_identity = None;
        state.archive = None;
        state.generation += 1;
        state.cancel = Arc::new(AtomicBool::new(false));
        state.last_transition = Instant::now();
    }

    /// Refresh the activity clock without a phase change. Progress reports
    /// count as forward motion for the stuck guard.
    fn touch(&self, generation: u64) {
        let mut state = self.lock_session();
        if state.generation == generation {
            state.last_transition = Instant::now();
        }
    }

    async fn set_phase(&self, generation: u64, phase: SyncPhase) -> Result<(), SyncError> {
        {
            let mut state = self.lock_session();
            if state.generation != generation {
                return Err(SyncError::Cancelled);
            }
            state.phase = phase;
            state.last_transition = Instant::now();
        }
        self.emit(SyncEvent::Phase { phase }).await;
        Ok(())
    }

    /// Park the session in AwaitingPassword (retaining any acquired archive)
    /// and return the error the pipeline should propagate.
    async fn suspend_awaiting_password(
        &self,
        generation: u64,
        udid: &str,
        archive: Option<BackupArchive>,
        invalid: bool,
    ) -> SyncError {
        {
            let mut state = self.lock_session();
            if state.generation != generation {
                return SyncError::Cancelled;
            }
            state.phase = SyncPhase::AwaitingPassword;
            state.last_transition = Instant::now();
            if archive.is_some() {
                state.archive = archive;
            }
        }
        self.emit(SyncEvent::Phase {
            phase: SyncPhase::AwaitingPassword,
        })
        .await;
        self.emit(SyncEvent::PasswordRequired {
            udid: udid.to_string(),
        })
        .await;
        if invalid {
            SyncError::PasswordInvalid
        } else {
            SyncError::PasswordRequired
        }
    }

    // ── events ──────────────────────────────────────────────────────────────

    /// Progress may be dropped under backpressure; everything else must land.
    fn emit_progress(&self, phase: SyncPhase, percent: u8, message: impl Into<String>) {
        let _ = self.events.try_send(SyncEvent::Progress {
            phase,
            percent,
            message: message.into(),
        });
    }

    async fn emit(&self, event: SyncEvent) {
        if self.events.send(event).await.is_err() {
            warn!("event channel closed, dropping event");
        }
    }
}

fn ensure_live(cancel: &CancelFlag) -> Result<(), SyncError> {
    if cancel.load(Ordering::SeqCst) {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionState, Contact, Conversation, Device, Message};
    use crate::ports::{BatchOutcome, RecordStore};
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    struct TestGateway {
        devices: Vec<Device>,
        encrypted: HashSet<String>,
        hang: HashSet<String>,
        slow_progress: HashSet<String>,
        passcode: HashSet<String>,
        acquisitions: AtomicUsize,
    }

    impl TestGateway {
        fn new(udids: &[&str]) -> Self {
            Self {
                devices: udids
                    .iter()
                    .map(|u| Device {
                        udid: u.to_string(),
                        name: format!("Phone {u}"),
                        connection_state: ConnectionState::Connected,
                    })
                    .collect(),
                encrypted: HashSet::new(),
                hang: HashSet::new(),
                slow_progress: HashSet::new(),
                passcode: HashSet::new(),
                acquisitions: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl DeviceGateway for TestGateway {
        async fn list_devices(&self) -> Result<Vec<Device>, SyncError> {
            Ok(self.devices.clone())
        }

        async fn check_encryption(&self, udid: &str) -> Result<bool, SyncError> {
            Ok(self.encrypted.contains(udid))
        }

        async fn acquire_backup(
            &self,
            udid: &str,
            dest: &Path,
            _force_full: bool,
            events: mpsc::Sender<AcquireEvent>,
            cancel: CancelFlag,
        ) -> Result<BackupArchive, SyncError> {
            if self.hang.contains(udid) {
                loop {
                    if cancel.load(Ordering::SeqCst) {
                        return Err(SyncError::Cancelled);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
            if self.slow_progress.contains(udid) {
                // Long copy that never goes quiet: a progress report every tick.
                self.acquisitions.fetch_add(1, Ordering::SeqCst);
                for step in 0..20u16 {
                    if cancel.load(Ordering::SeqCst) {
                        return Err(SyncError::Cancelled);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    let _ = events
                        .send(AcquireEvent::Progress {
                            percent: (step * 5) as u8,
                            message: "copying".into(),
                        })
                        .await;
                }
                return Ok(BackupArchive {
                    path: dest.to_path_buf(),
                    encrypted: false,
                    verified_password: None,
                });
            }
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
            let _ = events
                .send(AcquireEvent::Progress {
                    percent: 10,
                    message: "starting backup".into(),
                })
                .await;
            if self.passcode.contains(udid) {
                let _ = events.send(AcquireEvent::PasscodeRequired).await;
                tokio::time::sleep(Duration::from_millis(2)).await;
                let _ = events.send(AcquireEvent::PasscodeAccepted).await;
            }
            let _ = events
                .send(AcquireEvent::Progress {
                    percent: 100,
                    message: "backup finished".into(),
                })
                .await;
            Ok(BackupArchive {
                path: dest.to_path_buf(),
                encrypted: self.encrypted.contains(udid),
                verified_password: None,
            })
        }
    }

    struct TestCrypto {
        accepted: String,
        /// Pass verification but reject the password during decryption, like a
        /// decryptor that only notices the mismatch mid-stream.
        fail_decrypt: bool,
    }

    #[async_trait::async_trait]
    impl ArchiveCrypto for TestCrypto {
        async fn verify_password(
            &self,
            _archive_dir: &Path,
            password: &str,
        ) -> Result<bool, SyncError> {
            Ok(password == self.accepted)
        }

        async fn decrypt(&self, _archive_dir: &Path, _password: &str) -> Result<(), SyncError> {
            if self.fail_decrypt {
                return Err(SyncError::PasswordInvalid);
            }
            Ok(())
        }
    }

    struct TestParser {
        messages: usize,
        contacts: usize,
        cancel_during_parse: bool,
    }

    #[async_trait::async_trait]
    impl BackupParser for TestParser {
        async fn parse(
            &self,
            _archive: &BackupArchive,
            cancel: CancelFlag,
        ) -> Result<ParsedResult, SyncError> {
            if self.cancel_during_parse {
                // Simulates a user hitting cancel while records stream out.
                cancel.store(true, Ordering::SeqCst);
            }
            Ok(ParsedResult {
                messages: (0..self.messages)
                    .map(|i| Message {
                        external_id: format!("msg-{i}"),
                        conversation_id: "conv-1".into(),
                        sender: Some("+15550001".into()),
                        sent_at: 1_700_000_000 + i as i64,
                        body: format!("hello {i}"),
                        is_from_me: false,
                    })
                    .collect(),
                contacts: (0..self.contacts)
                    .map(|i| Contact {
                        external_id: format!("contact-{i}"),
                        display_name: format!("Person {i}"),
                        phone_numbers: Vec::new(),
                        emails: Vec::new(),
                    })
                    .collect(),
                conversations: vec![Conversation {
                    external_id: "conv-1".into(),
                    display_name: None,
                    participant_count: 2,
                    last_activity: None,
                }],
                skipped_records: 0,
                duration_ms: 1,
            })
        }

        async fn open_existing(&self, dir: &Path) -> Result<BackupArchive, SyncError> {
            Ok(BackupArchive {
                path: dir.to_path_buf(),
                encrypted: false,
                verified_password: None,
            })
        }
    }

    #[derive(Default)]
    struct CountingStore {
        rows: Mutex<HashSet<(String, String, String)>>,
    }

    impl CountingStore {
        fn insert(
            &self,
            kind: &str,
            identity: &Identity,
            ids: impl Iterator<Item = String>,
        ) -> BatchOutcome {
            let mut rows = self.rows.lock().unwrap();
            let mut outcome = BatchOutcome::default();
            for id in ids {
                if rows.insert((kind.to_string(), identity.0.clone(), id)) {
                    outcome.stored += 1;
                } else {
                    outcome.skipped += 1;
                }
            }
            outcome
        }

        fn total_rows(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        fn identities(&self) -> HashSet<String> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .map(|(_, identity, _)| identity.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl RecordStore for CountingStore {
        async fn store_messages(
            &self,
            identity: &Identity,
            batch: &[Message],
        ) -> Result<BatchOutcome, SyncError> {
            Ok(self.insert("m", identity, batch.iter().map(|m| m.external_id.clone())))
        }

        async fn store_contacts(
            &self,
            identity: &Identity,
            batch: &[Contact],
        ) -> Result<BatchOutcome, SyncError> {
            Ok(self.insert("c", identity, batch.iter().map(|c| c.external_id.clone())))
        }

        async fn store_conversations(
            &self,
            identity: &Identity,
            batch: &[Conversation],
        ) -> Result<BatchOutcome, SyncError> {
            Ok(self.insert("v", identity, batch.iter().map(|c| c.external_id.clone())))
        }
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl RecordStore for FailingStore {
        async fn store_messages(
            &self,
            _identity: &Identity,
            _batch: &[Message],
        ) -> Result<BatchOutcome, SyncError> {
            Err(SyncError::Persistence("disk full".into()))
        }

        async fn store_contacts(
            &self,
            _identity: &Identity,
            _batch: &[Contact],
        ) -> Result<BatchOutcome, SyncError> {
            Ok(BatchOutcome::default())
        }

        async fn store_conversations(
            &self,
            _identity: &Identity,
            _batch: &[Conversation],
        ) -> Result<BatchOutcome, SyncError> {
            Ok(BatchOutcome::default())
        }
    }

    struct StaticIdentity;

    impl IdentitySource for StaticIdentity {
        fn current_identity(&self) -> Option<Identity> {
            Some(Identity("user-1".into()))
        }
    }

    struct SwitchableIdentity {
        current: Mutex<String>,
    }

    impl IdentitySource for SwitchableIdentity {
        fn current_identity(&self) -> Option<Identity> {
            Some(Identity(self.current.lock().unwrap().clone()))
        }
    }

    struct Harness {
        orchestrator: Arc<SyncOrchestrator>,
        events: mpsc::Receiver<SyncEvent>,
        gateway: Arc<TestGateway>,
        store: Arc<CountingStore>,
    }

    fn build(
        gateway: Arc<TestGateway>,
        crypto: TestCrypto,
        parser: TestParser,
        store: Arc<dyn RecordStore>,
        identity: Arc<dyn IdentitySource>,
        stuck_threshold: Duration,
    ) -> (Arc<SyncOrchestrator>, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(512);
        let orchestrator = SyncOrchestrator::new(
            gateway,
            Arc::new(crypto),
            Arc::new(parser),
            PersistWriter::new(store, 2),
            identity,
            tx,
            PathBuf::from("/tmp/phone-sync-test-backups"),
            Duration::from_secs(10),
            stuck_threshold,
        );
        (orchestrator, rx)
    }

    fn harness(
        gateway: TestGateway,
        parser: TestParser,
        accepted_password: &str,
        stuck_threshold: Duration,
    ) -> Harness {
        let gateway = Arc::new(gateway);
        let store = Arc::new(CountingStore::default());
        let (orchestrator, events) = build(
            gateway.clone(),
            TestCrypto {
                accepted: accepted_password.to_string(),
                fail_decrypt: false,
            },
            parser,
            store.clone(),
            Arc::new(StaticIdentity),
            stuck_threshold,
        );
        Harness {
            orchestrator,
            events,
            gateway,
            store,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn phases(events: &[SyncEvent]) -> Vec<SyncPhase> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Phase { phase } => Some(*phase),
                _ => None,
            })
            .collect()
    }

    fn assert_phase_order(observed: &[SyncPhase], expected: &[SyncPhase]) {
        let mut it = observed.iter();
        for want in expected {
            assert!(
                it.any(|p| p == want),
                "phase {want:?} missing or out of order in {observed:?}"
            );
        }
    }

    #[tokio::test]
    async fn unencrypted_sync_runs_to_completion_with_ordered_phases() {
        let mut h = harness(
            TestGateway::new(&["UDID-A"]),
            TestParser {
                messages: 3,
                contacts: 2,
                cancel_during_parse: false,
            },
            "unused",
            Duration::from_secs(120),
        );

        let report = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-A".into(),
                ..SyncOptions::default()
            })
            .await;

        assert!(report.success, "report: {report:?}");
        assert_eq!(report.message_count, 3);
        assert_eq!(report.contact_count, 2);
        assert_eq!(report.conversation_count, 1);
        assert!(!h.orchestrator.status().is_running);

        let events = drain(&mut h.events);
        assert_phase_order(
            &phases(&events),
            &[
                SyncPhase::Acquiring,
                SyncPhase::Parsing,
                SyncPhase::Storing,
                SyncPhase::Complete,
                SyncPhase::Idle,
            ],
        );

        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");

        let complete = events.iter().find_map(|e| match e {
            SyncEvent::Complete { message_count, .. } => Some(*message_count),
            _ => None,
        });
        assert_eq!(complete, Some(3));

        let stored = events.iter().find_map(|e| match e {
            SyncEvent::StorageComplete {
                messages_stored, ..
            } => Some(*messages_stored),
            _ => None,
        });
        assert_eq!(stored, Some(3));
    }

    #[tokio::test]
    async fn second_sync_within_cooldown_is_rate_limited_without_state_change() {
        let mut h = harness(
            TestGateway::new(&["UDID-A"]),
            TestParser {
                messages: 1,
                contacts: 0,
                cancel_during_parse: false,
            },
            "unused",
            Duration::from_secs(120),
        );

        let first = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-A".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(first.success);
        drain(&mut h.events);

        let second = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-A".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(!second.success);
        assert!(second.rate_limited);
        assert!(second.remaining_ms.unwrap_or(0) > 0);
        assert_eq!(h.orchestrator.status().phase, SyncPhase::Idle);
        // Rejected without state change: no events at all.
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn wrong_password_suspends_and_correct_password_resumes_same_session() {
        let mut gateway = TestGateway::new(&["UDID-E"]);
        gateway.encrypted.insert("UDID-E".into());
        let mut h = harness(
            gateway,
            TestParser {
                messages: 4,
                contacts: 1,
                cancel_during_parse: false,
            },
            "hunter2",
            Duration::from_secs(120),
        );

        // No password: suspends before spending an acquisition.
        let first = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-E".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(first.awaiting_password);
        assert_eq!(h.orchestrator.status().phase, SyncPhase::AwaitingPassword);
        assert!(h.orchestrator.status().is_running);

        // Wrong password: acquires, fails verification, stays suspended.
        let second = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-E".into(),
                password: Some("wrong".into()),
                ..SyncOptions::default()
            })
            .await;
        assert!(second.password_invalid);
        assert_eq!(h.orchestrator.status().phase, SyncPhase::AwaitingPassword);

        // Correct password: resumes with the retained archive, no re-acquisition.
        let third = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-E".into(),
                password: Some("hunter2".into()),
                ..SyncOptions::default()
            })
            .await;
        assert!(third.success, "report: {third:?}");
        assert_eq!(third.message_count, 4);
        assert_eq!(h.gateway.acquisitions.load(Ordering::SeqCst), 1);
        assert!(!h.orchestrator.status().is_running);

        let events = drain(&mut h.events);
        let prompts = events
            .iter()
            .filter(|e| matches!(e, SyncEvent::PasswordRequired { .. }))
            .count();
        assert_eq!(prompts, 2);
    }

    #[tokio::test]
    async fn cancel_during_parsing_persists_nothing() {
        let mut h = harness(
            TestGateway::new(&["UDID-A"]),
            TestParser {
                messages: 10,
                contacts: 5,
                cancel_during_parse: true,
            },
            "unused",
            Duration::from_secs(120),
        );

        let report = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-A".into(),
                ..SyncOptions::default()
            })
            .await;

        assert!(report.cancelled, "report: {report:?}");
        assert_eq!(h.store.total_rows(), 0);
        assert_eq!(h.orchestrator.status().phase, SyncPhase::Idle);

        // Cancellation is not an error.
        let events = drain(&mut h.events);
        assert!(!events.iter().any(|e| matches!(e, SyncEvent::Error { .. })));
    }

    #[tokio::test]
    async fn stuck_session_is_force_reset_by_the_next_sync() {
        let mut gateway = TestGateway::new(&["UDID-H", "UDID-A"]);
        gateway.hang.insert("UDID-H".into());
        let mut h = harness(
            gateway,
            TestParser {
                messages: 1,
                contacts: 0,
                cancel_during_parse: false,
            },
            "unused",
            Duration::from_millis(50),
        );

        let orchestrator = h.orchestrator.clone();
        let hung = tokio::spawn(async move {
            orchestrator
                .sync(SyncOptions {
                    udid: "UDID-H".into(),
                    ..SyncOptions::default()
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.orchestrator.status().is_running);
        drain(&mut h.events);

        let report = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-A".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(report.success, "report: {report:?}");

        // The reset to Idle is observable before the new session's phases.
        let events = drain(&mut h.events);
        assert_phase_order(
            &phases(&events),
            &[SyncPhase::Idle, SyncPhase::Acquiring, SyncPhase::Complete],
        );

        let hung_report = hung.await.unwrap();
        assert!(hung_report.cancelled || !hung_report.success);
        assert!(!h.orchestrator.status().is_running);
    }

    #[tokio::test]
    async fn live_session_rejects_a_second_sync() {
        let mut gateway = TestGateway::new(&["UDID-H"]);
        gateway.hang.insert("UDID-H".into());
        let h = harness(
            gateway,
            TestParser {
                messages: 1,
                contacts: 0,
                cancel_during_parse: false,
            },
            "unused",
            Duration::from_secs(600),
        );

        let orchestrator = h.orchestrator.clone();
        let hung = tokio::spawn(async move {
            orchestrator
                .sync(SyncOptions {
                    udid: "UDID-H".into(),
                    ..SyncOptions::default()
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-H".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(!second.success);
        assert!(!second.rate_limited);
        assert!(second.error.unwrap_or_default().contains("already running"));

        h.orchestrator.cancel().await;
        let hung_report = hung.await.unwrap();
        assert!(hung_report.cancelled);
        assert!(!h.orchestrator.status().is_running);
    }

    #[tokio::test]
    async fn process_existing_skips_acquisition() {
        let mut h = harness(
            TestGateway::new(&[]),
            TestParser {
                messages: 2,
                contacts: 2,
                cancel_during_parse: false,
            },
            "unused",
            Duration::from_secs(120),
        );

        let report = h.orchestrator.process_existing("UDID-A", None).await;
        assert!(report.success, "report: {report:?}");
        assert_eq!(h.gateway.acquisitions.load(Ordering::SeqCst), 0);

        let events = drain(&mut h.events);
        let observed = phases(&events);
        assert!(!observed.contains(&SyncPhase::Acquiring));
        assert_phase_order(
            &observed,
            &[SyncPhase::Parsing, SyncPhase::Storing, SyncPhase::Complete],
        );
    }

    #[tokio::test]
    async fn disconnected_device_fails_and_resets_to_idle() {
        let mut h = harness(
            TestGateway::new(&["UDID-A"]),
            TestParser {
                messages: 1,
                contacts: 0,
                cancel_during_parse: false,
            },
            "unused",
            Duration::from_secs(120),
        );

        let report = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-GONE".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(!report.success);
        assert!(report.error.unwrap_or_default().contains("not connected"));
        assert_eq!(h.orchestrator.status().phase, SyncPhase::Idle);

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, SyncEvent::Error { .. })));
    }

    #[tokio::test]
    async fn passcode_prompt_events_are_forwarded() {
        let mut gateway = TestGateway::new(&["UDID-P"]);
        gateway.passcode.insert("UDID-P".into());
        let mut h = harness(
            gateway,
            TestParser {
                messages: 1,
                contacts: 0,
                cancel_during_parse: false,
            },
            "unused",
            Duration::from_secs(120),
        );

        let report = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-P".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(report.success);

        let events = drain(&mut h.events);
        let waiting = events
            .iter()
            .position(|e| matches!(e, SyncEvent::WaitingForPasscode { .. }));
        let entered = events
            .iter()
            .position(|e| matches!(e, SyncEvent::PasscodeEntered { .. }));
        assert!(waiting.is_some() && entered.is_some());
        assert!(waiting < entered);
    }

    #[tokio::test]
    async fn force_reset_is_safe_when_idle() {
        let h = harness(
            TestGateway::new(&[]),
            TestParser {
                messages: 0,
                contacts: 0,
                cancel_during_parse: false,
            },
            "unused",
            Duration::from_secs(120),
        );
        h.orchestrator.force_reset().await;
        assert_eq!(h.orchestrator.status().phase, SyncPhase::Idle);
    }

    #[tokio::test]
    async fn steady_progress_keeps_a_long_session_alive() {
        let mut gateway = TestGateway::new(&["UDID-S", "UDID-A"]);
        gateway.slow_progress.insert("UDID-S".into());
        let h = harness(
            gateway,
            TestParser {
                messages: 1,
                contacts: 0,
                cancel_during_parse: false,
            },
            "unused",
            Duration::from_millis(80),
        );

        let orchestrator = h.orchestrator.clone();
        let long = tokio::spawn(async move {
            orchestrator
                .sync(SyncOptions {
                    udid: "UDID-S".into(),
                    ..SyncOptions::default()
                })
                .await
        });

        // Well past the stuck threshold, but the copy reports every 10ms.
        tokio::time::sleep(Duration::from_millis(120)).await;

        // Same udid inside the cooldown: the limiter answers first, before
        // any stuck check could touch the running session.
        let same = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-S".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(same.rate_limited, "report: {same:?}");

        // Different udid: the session is old but still reporting progress,
        // so it is busy, not stuck.
        let other = h
            .orchestrator
            .sync(SyncOptions {
                udid: "UDID-A".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(other.error.unwrap_or_default().contains("already running"));

        let report = long.await.unwrap();
        assert!(report.success, "report: {report:?}");
    }

    #[tokio::test]
    async fn storage_failure_emits_failed_complete_then_storage_error() {
        let gateway = Arc::new(TestGateway::new(&["UDID-A"]));
        let (orchestrator, mut rx) = build(
            gateway,
            TestCrypto {
                accepted: "unused".into(),
                fail_decrypt: false,
            },
            TestParser {
                messages: 2,
                contacts: 1,
                cancel_during_parse: false,
            },
            Arc::new(FailingStore),
            Arc::new(StaticIdentity),
            Duration::from_secs(120),
        );

        let report = orchestrator
            .sync(SyncOptions {
                udid: "UDID-A".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(!report.success);
        assert_eq!(orchestrator.status().phase, SyncPhase::Idle);

        let events = drain(&mut rx);
        let complete = events
            .iter()
            .position(|e| matches!(e, SyncEvent::Complete { success: false, .. }));
        let storage_error = events
            .iter()
            .position(|e| matches!(e, SyncEvent::StorageError { .. }));
        assert!(
            complete.is_some() && storage_error.is_some(),
            "events: {events:?}"
        );
        assert!(complete < storage_error);
        // Persistence failures surface as a storage error, not a generic one.
        assert!(!events.iter().any(|e| matches!(e, SyncEvent::Error { .. })));
    }

    #[tokio::test]
    async fn records_stay_with_the_identity_bound_at_session_start() {
        let mut gateway = TestGateway::new(&["UDID-E"]);
        gateway.encrypted.insert("UDID-E".into());
        let store = Arc::new(CountingStore::default());
        let identity = Arc::new(SwitchableIdentity {
            current: Mutex::new("user-a".into()),
        });
        let (orchestrator, _rx) = build(
            Arc::new(gateway),
            TestCrypto {
                accepted: "hunter2".into(),
                fail_decrypt: false,
            },
            TestParser {
                messages: 3,
                contacts: 1,
                cancel_during_parse: false,
            },
            store.clone(),
            identity.clone(),
            Duration::from_secs(120),
        );

        let first = orchestrator
            .sync(SyncOptions {
                udid: "UDID-E".into(),
                ..SyncOptions::default()
            })
            .await;
        assert!(first.awaiting_password);

        // Another account logs in while the session waits for its password.
        *identity.current.lock().unwrap() = "user-b".into();

        let resumed = orchestrator
            .sync(SyncOptions {
                udid: "UDID-E".into(),
                password: Some("hunter2".into()),
                ..SyncOptions::default()
            })
            .await;
        assert!(resumed.success, "report: {resumed:?}");

        assert_eq!(
            store.identities(),
            HashSet::from(["user-a".to_string()]),
            "records re-homed to a mid-session login"
        );
    }

    #[tokio::test]
    async fn decrypt_rejecting_the_password_reparks_the_session() {
        let mut gateway = TestGateway::new(&["UDID-E"]);
        gateway.encrypted.insert("UDID-E".into());
        let (orchestrator, mut rx) = build(
            Arc::new(gateway),
            TestCrypto {
                accepted: "hunter2".into(),
                fail_decrypt: true,
            },
            TestParser {
                messages: 1,
                contacts: 0,
                cancel_during_parse: false,
            },
            Arc::new(CountingStore::default()),
            Arc::new(StaticIdentity),
            Duration::from_secs(120),
        );

        let report = orchestrator
            .sync(SyncOptions {
                udid: "UDID-E".into(),
                password: Some("hunter2".into()),
                ..SyncOptions::default()
            })
            .await;
        assert!(report.password_invalid, "report: {report:?}");

        // Suspended for a re-prompt, not abandoned in Decrypting.
        let status = orchestrator.status();
        assert_eq!(status.phase, SyncPhase::AwaitingPassword);
        assert!(status.is_running);

        let events = drain(&mut rx);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, SyncEvent::PasswordRequired { .. }))
        );
    }

    #[test]
    fn stuck_guard_is_a_pure_function_of_state_and_clock() {
        let now = Instant::now();
        let threshold = Duration::from_secs(60);
        let old = now - Duration::from_secs(120);

        assert!(is_stuck(SyncPhase::Acquiring, old, now, threshold));
        assert!(is_stuck(SyncPhase::Storing, old, now, threshold));
        // Fresh transitions are not stuck.
        assert!(!is_stuck(SyncPhase::Acquiring, now, now, threshold));
        // Human-interaction suspensions are unbounded by design.
        assert!(!is_stuck(SyncPhase::AwaitingPassword, old, now, threshold));
        assert!(!is_stuck(SyncPhase::AwaitingPasscode, old, now, threshold));
        // Idle is never stuck.
        assert!(!is_stuck(SyncPhase::Idle, old, now, threshold));
    }
}
