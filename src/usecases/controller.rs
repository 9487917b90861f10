//! Implements the inbound `SyncControl` port: one facade combining the
//! orchestrator and the device watcher for the UI adapter.

use crate::domain::{Device, SyncEvent, SyncOptions, SyncReport, SyncStatus, UnifiedStatus};
use crate::ports::SyncControl;
use crate::usecases::device_watcher::DeviceWatcher;
use crate::usecases::orchestrator::SyncOrchestrator;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct SyncController {
    orchestrator: Arc<SyncOrchestrator>,
    watcher: Arc<DeviceWatcher>,
    default_poll_interval: Duration,
    /// Receiver half of the event channel, held until the subscriber claims it.
    events: Mutex<Option<mpsc::Receiver<SyncEvent>>>,
}

impl SyncController {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        watcher: Arc<DeviceWatcher>,
        default_poll_interval: Duration,
        events: mpsc::Receiver<SyncEvent>,
    ) -> Self {
        Self {
            orchestrator,
            watcher,
            default_poll_interval,
            events: Mutex::new(Some(events)),
        }
    }
}

#[async_trait::async_trait]
impl SyncControl for SyncController {
    async fn start(&self, options: SyncOptions) -> SyncReport {
        self.orchestrator.sync(options).await
    }

    async fn process_existing(&self, udid: &str, password: Option<String>) -> SyncReport {
        self.orchestrator.process_existing(udid, password).await
    }

    async fn cancel(&self) {
        self.orchestrator.cancel().await;
    }

    async fn reset(&self) {
        self.orchestrator.force_reset().await;
    }

    async fn status(&self) -> SyncStatus {
        self.orchestrator.status()
    }

    async fn unified_status(&self) -> UnifiedStatus {
        let mut status = self.orchestrator.status_detail();
        status.detection_running = self.watcher.is_detecting();
        status.connected_devices = self.watcher.connected_devices().await.len();
        status
    }

    async fn devices(&self) -> Vec<Device> {
        self.watcher.connected_devices().await
    }

    async fn start_detection(&self, interval: Option<Duration>) {
        self.watcher
            .start_detection(interval.unwrap_or(self.default_poll_interval));
        // The event channel has a single subscriber; re-announce current
        // devices so it does not miss pre-detection state.
        self.watcher.replay_connected().await;
    }

    async fn stop_detection(&self) {
        self.watcher.stop_detection();
    }

    async fn take_events(&self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }
}
