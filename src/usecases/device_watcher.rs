//! Device detection: polls the gateway on its own periodic task, diffs
//! successive snapshots and emits connect/disconnect events exactly once per
//! physical transition. Independent of any in-flight sync.

use crate::domain::{Device, SyncEvent};
use crate::ports::DeviceGateway;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct DeviceWatcher {
    gateway: Arc<dyn DeviceGateway>,
    events: mpsc::Sender<SyncEvent>,
    /// Last snapshot, keyed by udid. Source of truth for `connected_devices`
    /// while detection runs.
    known: Mutex<HashMap<String, Device>>,
    detecting: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceWatcher {
    pub fn new(gateway: Arc<dyn DeviceGateway>, events: mpsc::Sender<SyncEvent>) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            events,
            known: Mutex::new(HashMap::new()),
            detecting: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    /// Begin polling at `interval`. Idempotent if already running.
    pub fn start_detection(self: &Arc<Self>, interval: Duration) {
        if self.detecting.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(interval_ms = interval.as_millis() as u64, "device detection started");
        let watcher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if let Err(e) = watcher.poll_once().await {
                    warn!(error = %e, "device poll failed");
                }
            }
        });
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        *task = Some(handle);
    }

    /// Stop polling. Safe to call when not running.
    pub fn stop_detection(&self) {
        if !self.detecting.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
        }
        info!("device detection stopped");
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting.load(Ordering::SeqCst)
    }

    /// Point-in-time snapshot. Falls back to a direct gateway query when
    /// detection is not running.
    pub async fn connected_devices(&self) -> Vec<Device> {
        if self.is_detecting() {
            let known = self.known.lock().unwrap_or_else(|p| p.into_inner());
            let mut devices: Vec<Device> = known.values().cloned().collect();
            devices.sort_by(|a, b| a.udid.cmp(&b.udid));
            return devices;
        }
        match self.gateway.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "device list query failed");
                Vec::new()
            }
        }
    }

    /// Re-announce currently-connected devices once, so a late subscriber does
    /// not miss state that changed before it attached.
    pub async fn replay_connected(&self) {
        let devices: Vec<Device> = {
            let known = self.known.lock().unwrap_or_else(|p| p.into_inner());
            known.values().cloned().collect()
        };
        for device in devices {
            self.emit(SyncEvent::DeviceConnected { device }).await;
        }
    }

    /// One detection cycle: snapshot the gateway and emit events for the diff.
    pub async fn poll_once(&self) -> Result<(), crate::domain::SyncError> {
        let snapshot = self.gateway.list_devices().await?;

        let (connected, disconnected) = {
            let mut known = self.known.lock().unwrap_or_else(|p| p.into_inner());
            let mut connected = Vec::new();
            for device in &snapshot {
                if !known.contains_key(&device.udid) {
                    connected.push(device.clone());
                }
            }
            let disconnected: Vec<String> = known
                .keys()
                .filter(|udid| !snapshot.iter().any(|d| &d.udid == *udid))
                .cloned()
                .collect();
            known.clear();
            for device in snapshot {
                known.insert(device.udid.clone(), device);
            }
            (connected, disconnected)
        };

        for device in connected {
            info!(udid = %device.udid, name = %device.name, "device connected");
            self.emit(SyncEvent::DeviceConnected { device }).await;
        }
        for udid in disconnected {
            info!(udid = %udid, "device disconnected");
            self.emit(SyncEvent::DeviceDisconnected { udid }).await;
        }
        Ok(())
    }

    async fn emit(&self, event: SyncEvent) {
        if self.events.send(event).await.is_err() {
            warn!("event channel closed, dropping device event");
        }
    }
}
