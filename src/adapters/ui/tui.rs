//! Inquire-based interactive menu over the SyncControl port.

use crate::domain::{Device, SyncOptions, SyncReport};
use crate::ports::SyncControl;
use anyhow::Result;
use inquire::ui::{Attributes, Color, RenderConfig, StyleSheet, Styled};
use inquire::{Confirm, Password, PasswordDisplayMode, Select};
use std::sync::Arc;
use tracing::info;

/// Applies the neon theme to all subsequent inquire prompts. Call once at
/// startup.
pub fn apply_theme() {
    let mut cfg = RenderConfig::default();
    cfg.prompt_prefix = Styled::new(">").with_fg(Color::LightMagenta);
    cfg.highlighted_option_prefix = Styled::new(">").with_fg(Color::LightCyan);
    cfg.selected_option = Some(
        StyleSheet::new()
            .with_fg(Color::LightCyan)
            .with_attr(Attributes::BOLD),
    );
    cfg.answer = StyleSheet::new().with_fg(Color::LightMagenta);
    inquire::set_global_render_config(cfg);
}

const MENU_LIST: &str = "List devices";
const MENU_SYNC: &str = "Sync a device";
const MENU_PROCESS: &str = "Process existing backup";
const MENU_STATUS: &str = "Show status";
const MENU_DETECT_START: &str = "Start device detection";
const MENU_DETECT_STOP: &str = "Stop device detection";
const MENU_CANCEL: &str = "Cancel running sync";
const MENU_RESET: &str = "Force reset";
const MENU_QUIT: &str = "Quit";

/// TUI adapter. Drives the inbound port from an interactive menu.
pub struct Tui {
    control: Arc<dyn SyncControl>,
}

impl Tui {
    pub fn new(control: Arc<dyn SyncControl>) -> Self {
        Self { control }
    }

    pub async fn run(&self) -> Result<()> {
        loop {
            let choice = Select::new(
                "phone-sync",
                vec![
                    MENU_LIST,
                    MENU_SYNC,
                    MENU_PROCESS,
                    MENU_STATUS,
                    MENU_DETECT_START,
                    MENU_DETECT_STOP,
                    MENU_CANCEL,
                    MENU_RESET,
                    MENU_QUIT,
                ],
            )
            .prompt();

            let Ok(choice) = choice else {
                // Esc/Ctrl-C at the menu exits.
                break;
            };
            match choice {
                MENU_LIST => self.list_devices().await,
                MENU_SYNC => self.sync_device().await,
                MENU_PROCESS => self.process_existing().await,
                MENU_STATUS => self.show_status().await,
                MENU_DETECT_START => {
                    self.control.start_detection(None).await;
                    println!("device detection started");
                }
                MENU_DETECT_STOP => {
                    self.control.stop_detection().await;
                    println!("device detection stopped");
                }
                MENU_CANCEL => {
                    self.control.cancel().await;
                    println!("cancellation requested");
                }
                MENU_RESET => {
                    self.control.reset().await;
                    println!("orchestrator reset to idle");
                }
                MENU_QUIT => break,
                _ => unreachable!(),
            }
        }
        info!("tui exiting");
        Ok(())
    }

    async fn list_devices(&self) {
        let devices = self.control.devices().await;
        if devices.is_empty() {
            println!("no devices attached");
            return;
        }
        for d in &devices {
            println!("{} ({}) [{:?}]", d.name, d.udid, d.connection_state);
        }
    }

    async fn pick_device(&self) -> Option<Device> {
        let devices = self.control.devices().await;
        if devices.is_empty() {
            println!("no devices attached");
            return None;
        }
        let options: Vec<String> = devices
            .iter()
            .map(|d| format!("{} ({})", d.name, d.udid))
            .collect();
        let selected = Select::new("Select device", options.clone()).prompt().ok()?;
        devices
            .into_iter()
            .zip(options)
            .find(|(_, label)| *label == selected)
            .map(|(d, _)| d)
    }

    fn prompt_password() -> Option<String> {
        Password::new("Backup password:")
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()
            .ok()
            .filter(|p| !p.is_empty())
    }

    async fn sync_device(&self) {
        let Some(device) = self.pick_device().await else {
            return;
        };
        let force_full = Confirm::new("Force a full (non-incremental) backup?")
            .with_default(false)
            .prompt()
            .unwrap_or(false);

        let mut options = SyncOptions {
            udid: device.udid.clone(),
            password: None,
            force_full_backup: force_full,
        };
        loop {
            let report = self.control.start(options.clone()).await;
            if !Self::handle_report(&report) {
                break;
            }
            // Session is suspended awaiting a password; re-prompt and resume.
            let Some(password) = Self::prompt_password() else {
                self.control.cancel().await;
                println!("sync abandoned");
                break;
            };
            options.password = Some(password);
        }
    }

    async fn process_existing(&self) {
        let Some(device) = self.pick_device().await else {
            return;
        };
        let mut password = None;
        loop {
            let report = self
                .control
                .process_existing(&device.udid, password.clone())
                .await;
            if !Self::handle_report(&report) {
                break;
            }
            let Some(entered) = Self::prompt_password() else {
                self.control.cancel().await;
                println!("processing abandoned");
                break;
            };
            password = Some(entered);
        }
    }

    /// Prints the report. Returns true when the caller should re-prompt for a
    /// password and try again.
    fn handle_report(report: &SyncReport) -> bool {
        if report.awaiting_password {
            if report.password_invalid {
                println!("password rejected, try again");
            } else {
                println!("this backup is encrypted");
            }
            return true;
        }
        if report.rate_limited {
            println!(
                "rate limited, retry in {} ms",
                report.remaining_ms.unwrap_or_default()
            );
        } else if report.cancelled {
            println!("cancelled");
        } else if report.success {
            println!(
                "done: {} messages, {} contacts, {} conversations in {} ms",
                report.message_count,
                report.contact_count,
                report.conversation_count,
                report.duration_ms
            );
        } else if let Some(error) = &report.error {
            println!("failed: {error}");
        }
        false
    }

    async fn show_status(&self) {
        let status = self.control.unified_status().await;
        match serde_json::to_string_pretty(&status) {
            Ok(json) => println!("{json}"),
            Err(_) => println!("{status:?}"),
        }
    }
}
