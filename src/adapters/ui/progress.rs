//! Renders the sync event stream as an indicatif progress bar.
//!
//! The orchestrator owns the sender half of a bounded channel; this task is
//! the single subscriber. Progress events drive the bar, everything else is
//! printed above it so the bar never gets clobbered.

use crate::domain::SyncEvent;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Consumes events until the channel closes. Returns the task handle so the
/// caller can abort it on shutdown.
pub fn spawn_event_listener(mut events: mpsc::Receiver<SyncEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::hidden();
        bar.set_style(bar_style());
        bar.set_length(100);

        while let Some(event) = events.recv().await {
            match event {
                SyncEvent::Progress {
                    phase,
                    percent,
                    message,
                } => {
                    if bar.is_hidden() {
                        bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                    }
                    bar.set_position(u64::from(percent.min(100)));
                    bar.set_message(format!("[{phase}] {message}"));
                }
                SyncEvent::Phase { phase } => {
                    bar.println(format!("phase: {phase}"));
                }
                SyncEvent::DeviceConnected { device } => {
                    bar.println(format!("device connected: {} ({})", device.name, device.udid));
                }
                SyncEvent::DeviceDisconnected { udid } => {
                    bar.println(format!("device disconnected: {udid}"));
                }
                SyncEvent::PasswordRequired { udid } => {
                    bar.println(format!("backup for {udid} is encrypted; password required"));
                }
                SyncEvent::WaitingForPasscode { udid } => {
                    bar.println(format!("enter the passcode on device {udid} to continue"));
                }
                SyncEvent::PasscodeEntered { udid } => {
                    bar.println(format!("passcode accepted on {udid}"));
                }
                SyncEvent::Error { message } => {
                    bar.println(format!("error: {message}"));
                }
                SyncEvent::Complete {
                    success,
                    error,
                    message_count,
                    contact_count,
                    conversation_count,
                } => {
                    if success {
                        bar.println(format!(
                            "sync complete: {message_count} messages, {contact_count} contacts, \
                             {conversation_count} conversations"
                        ));
                    } else {
                        bar.println(format!(
                            "sync failed: {}",
                            error.unwrap_or_else(|| "unknown error".into())
                        ));
                    }
                    bar.set_position(0);
                    bar.set_message(String::new());
                    bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
                }
                SyncEvent::StorageComplete {
                    messages_stored,
                    contacts_stored,
                    conversations_stored,
                    duration_ms,
                } => {
                    bar.println(format!(
                        "stored {messages_stored} messages, {contacts_stored} contacts, \
                         {conversations_stored} conversations in {duration_ms} ms"
                    ));
                }
                SyncEvent::StorageError { error } => {
                    bar.println(format!("storage error: {error}"));
                }
            }
        }
        bar.finish_and_clear();
    })
}
