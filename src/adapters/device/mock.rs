//! Mock device gateway for development without phone hardware.
//!
//! Fabricates a small, deterministic backup archive per device so the whole
//! pipeline (including encryption and the password suspension flow) can be
//! exercised end to end.

use crate::adapters::backup::ArchiveBuilder;
use crate::domain::{
    BackupArchive, ConnectionState, Contact, Conversation, Device, Message, SyncError,
};
use crate::ports::{AcquireEvent, CancelFlag, DeviceGateway};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Mock gateway. Devices, backup passwords, and pairing behavior are all
/// configured up front.
pub struct MockDeviceGateway {
    devices: Mutex<Vec<Device>>,
    /// udid -> backup password. Present means encrypted backups.
    passwords: HashMap<String, String>,
    /// Devices that simulate first-time pairing (on-device passcode prompt).
    needs_passcode: Vec<String>,
    /// Simulated per-step transfer delay.
    step_delay: Duration,
}

impl MockDeviceGateway {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(vec![Device {
                udid: "00008110-MOCKDEVICE01".into(),
                name: "Mock Phone".into(),
                connection_state: ConnectionState::Connected,
            }]),
            passwords: HashMap::new(),
            needs_passcode: Vec::new(),
            step_delay: Duration::from_millis(100),
        }
    }

    pub fn with_devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = Mutex::new(devices);
        self
    }

    /// Mark `udid` as producing encrypted backups locked with `password`.
    pub fn with_password(mut self, udid: impl Into<String>, password: impl Into<String>) -> Self {
        self.passwords.insert(udid.into(), password.into());
        self
    }

    pub fn with_passcode_prompt(mut self, udid: impl Into<String>) -> Self {
        self.needs_passcode.push(udid.into());
        self
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    /// Simulate plugging a device in or out mid-run.
    pub fn set_devices(&self, devices: Vec<Device>) {
        if let Ok(mut guard) = self.devices.lock() {
            *guard = devices;
        }
    }

    fn fabricate_records(udid: &str) -> (Vec<Conversation>, Vec<Contact>, Vec<Message>) {
        let conversations = vec![
            Conversation {
                external_id: format!("{udid}:conv-family"),
                display_name: Some("Family".into()),
                participant_count: 4,
                last_activity: Some(1_700_000_500),
            },
            Conversation {
                external_id: format!("{udid}:conv-work"),
                display_name: Some("Work".into()),
                participant_count: 9,
                last_activity: Some(1_700_000_900),
            },
        ];
        let contacts = vec![
            Contact {
                external_id: format!("{udid}:contact-1"),
                display_name: "Alice Example".into(),
                phone_numbers: vec!["+15550001111".into()],
                emails: vec!["alice@example.com".into()],
            },
            Contact {
                external_id: format!("{udid}:contact-2"),
                display_name: "Bob Example".into(),
                phone_numbers: vec!["+15550002222".into(), "+15550003333".into()],
                emails: vec![],
            },
        ];
        let messages = (0..40)
            .map(|i| Message {
                external_id: format!("{udid}:msg-{i}"),
                conversation_id: if i % 3 == 0 {
                    format!("{udid}:conv-work")
                } else {
                    format!("{udid}:conv-family")
                },
                sender: (i % 2 == 0).then(|| "+15550001111".into()),
                sent_at: 1_700_000_000 + i,
                body: format!("mock message {i}"),
                is_from_me: i % 2 != 0,
            })
            .collect();
        (conversations, contacts, messages)
    }
}

impl Default for MockDeviceGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceGateway for MockDeviceGateway {
    async fn list_devices(&self) -> Result<Vec<Device>, SyncError> {
        Ok(self
            .devices
            .lock()
            .map_err(|_| SyncError::Gateway("device list poisoned".into()))?
            .clone())
    }

    async fn check_encryption(&self, udid: &str) -> Result<bool, SyncError> {
        Ok(self.passwords.contains_key(udid))
    }

    async fn acquire_backup(
        &self,
        udid: &str,
        dest: &Path,
        force_full: bool,
        events: mpsc::Sender<AcquireEvent>,
        cancel: CancelFlag,
    ) -> Result<BackupArchive, SyncError> {
        let known = self.list_devices().await?.into_iter().any(|d| {
            d.udid == udid && d.connection_state == ConnectionState::Connected
        });
        if !known {
            return Err(SyncError::DeviceUnavailable(udid.to_string()));
        }
        info!(udid, force_full, "mock acquisition started");

        if self.needs_passcode.iter().any(|u| u == udid) {
            let _ = events.send(AcquireEvent::PasscodeRequired).await;
            tokio::time::sleep(self.step_delay).await;
            if cancel.load(Ordering::Relaxed) {
                return Err(SyncError::Cancelled);
            }
            let _ = events.send(AcquireEvent::PasscodeAccepted).await;
        }

        // Ten simulated transfer steps with cancellation between each.
        for step in 1..=10u8 {
            if cancel.load(Ordering::Relaxed) {
                return Err(SyncError::Cancelled);
            }
            tokio::time::sleep(self.step_delay).await;
            let _ = events
                .send(AcquireEvent::Progress {
                    percent: step * 10,
                    message: format!("transferring backup data ({step}/10)"),
                })
                .await;
        }

        let (conversations, contacts, messages) = Self::fabricate_records(udid);
        let mut builder = ArchiveBuilder::new(dest, udid, "Mock Phone")
            .conversations(conversations)
            .contacts(contacts)
            .messages(messages);
        if let Some(password) = self.passwords.get(udid) {
            // Light KDF keeps the interactive mock flow snappy.
            builder = builder.password(password.clone()).kdf_cost(8192, 1, 1);
        }
        let archive = builder.write().await?;
        info!(udid, path = %archive.path.display(), encrypted = archive.encrypted, "mock acquisition complete");
        Ok(archive)
    }
}
