//! Inbound port. UI (adapter) calls into the application.

use crate::domain::{Device, SyncEvent, SyncOptions, SyncReport, SyncStatus, UnifiedStatus};
use std::time::Duration;
use tokio::sync::mpsc;

/// Input port: the external surface of the sync subsystem. Bind to whatever
/// transport the host process uses (here: the TUI adapter).
#[async_trait::async_trait]
pub trait SyncControl: Send + Sync {
    /// Start a sync for a device. Rejections (rate limit, already running) and
    /// suspensions (awaiting password) are encoded in the report, not errors.
    async fn start(&self, options: SyncOptions) -> SyncReport;

    /// Same pipeline minus acquisition, operating on the archive already on
    /// disk for that device.
    async fn process_existing(&self, udid: &str, password: Option<String>) -> SyncReport;

    /// Request cooperative cancellation of the running session.
    async fn cancel(&self);

    /// Unconditionally return the orchestrator to Idle. Safe when idle.
    async fn reset(&self);

    async fn status(&self) -> SyncStatus;

    async fn unified_status(&self) -> UnifiedStatus;

    /// Snapshot of currently attached devices.
    async fn devices(&self) -> Vec<Device>;

    /// Begin device polling. Idempotent. `None` uses the configured interval.
    async fn start_detection(&self, interval: Option<Duration>);

    async fn stop_detection(&self);

    /// Hand over the event stream to the single subscriber. Returns `None`
    /// once taken.
    async fn take_events(&self) -> Option<mpsc::Receiver<SyncEvent>>;
}
