//! Wiring & DI. Entry point: bootstrap adapters, inject into the orchestrator,
//! run the TUI. No business logic here.

use dotenv::dotenv;
use phone_sync::adapters::backup::{ArchiveCipher, SqliteBackupParser};
use phone_sync::adapters::device::{BackupToolGateway, MockDeviceGateway};
use phone_sync::adapters::identity::StaticIdentitySource;
use phone_sync::adapters::persistence::SqliteStore;
use phone_sync::adapters::ui::{progress, tui::Tui};
use phone_sync::ports::{
    ArchiveCrypto, BackupParser, DeviceGateway, IdentitySource, RecordStore, SyncControl,
};
use phone_sync::shared::config::AppConfig;
use phone_sync::usecases::{DeviceWatcher, PersistWriter, SyncController, SyncOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    phone_sync::adapters::ui::init_ui();

    let cfg = AppConfig::load().unwrap_or_default();
    let data_dir = PathBuf::from(cfg.data_dir_or_default());
    let backup_dir = PathBuf::from(cfg.backup_dir_or_default());
    tokio::fs::create_dir_all(&backup_dir)
        .await
        .map_err(|e| anyhow::anyhow!("create backup dir: {}", e))?;
    info!(
        data = %data_dir.display(),
        backups = %backup_dir.display(),
        "directories ready"
    );

    // --- Device gateway: external tooling, or mock when none is configured ---
    let gateway: Arc<dyn DeviceGateway> = if cfg.use_mock_devices() {
        warn!("using mock device gateway (set PHONE_SYNC_LIST_TOOL / PHONE_SYNC_BACKUP_TOOL for real devices)");
        Arc::new(MockDeviceGateway::new())
    } else {
        info!(
            list_tool = %cfg.list_tool_or_default(),
            backup_tool = %cfg.backup_tool_or_default(),
            "using external backup tooling"
        );
        Arc::new(BackupToolGateway::new(
            cfg.list_tool_or_default(),
            cfg.backup_tool_or_default(),
        ))
    };

    let crypto: Arc<dyn ArchiveCrypto> = Arc::new(ArchiveCipher::new());
    let parser: Arc<dyn BackupParser> =
        Arc::new(SqliteBackupParser::new(cfg.parse_chunk_size_or_default()));

    let store = SqliteStore::connect(&data_dir)
        .await
        .map_err(|e| anyhow::anyhow!("SQLite connect failed: {}", e))?;
    let store: Arc<dyn RecordStore> = Arc::new(store);
    let writer = PersistWriter::new(store, cfg.batch_size_or_default());

    let identity_source: Arc<dyn IdentitySource> =
        Arc::new(StaticIdentitySource::new(cfg.identity.clone()));
    if identity_source.current_identity().is_none() {
        warn!("PHONE_SYNC_IDENTITY not set; syncs will fail until an identity is configured");
    }

    // --- Event stream: bounded channel, single UI subscriber ---
    let event_queue_size = cfg.event_queue_size_or_default();
    info!(event_queue_size, "event queue buffer (backpressure)");
    let (event_tx, event_rx) = mpsc::channel(event_queue_size);

    let orchestrator = SyncOrchestrator::new(
        gateway.clone(),
        crypto,
        parser,
        writer,
        identity_source,
        event_tx.clone(),
        backup_dir,
        Duration::from_secs(cfg.cooldown_secs_or_default()),
        Duration::from_secs(cfg.stuck_threshold_secs_or_default()),
    );
    let watcher = DeviceWatcher::new(gateway, event_tx);

    let poll_interval = Duration::from_millis(cfg.poll_interval_ms_or_default());
    let controller: Arc<dyn SyncControl> = Arc::new(SyncController::new(
        orchestrator,
        watcher,
        poll_interval,
        event_rx,
    ));
    let listener = match controller.take_events().await {
        Some(rx) => progress::spawn_event_listener(rx),
        None => anyhow::bail!("event stream already claimed"),
    };
    controller.start_detection(None).await;

    // --- Run (menu -> list / sync / process / status) ---
    let tui = Tui::new(Arc::clone(&controller));
    tui.run().await?;

    controller.stop_detection().await;
    listener.abort();
    Ok(())
}
