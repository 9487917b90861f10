//! Application configuration. Device tooling paths, timing knobs, identity.

use serde::Deserialize;

/// Default capacity for the UI event channel. Bounded so a stalled UI cannot
/// balloon memory; progress events are dropped when full, everything else
/// applies backpressure.
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 256;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    /// Identity stamped onto every stored record. Read from PHONE_SYNC_IDENTITY.
    pub identity: Option<String>,

    /// Base directory for the application database. Read from PHONE_SYNC_DATA_DIR.
    pub data_dir: Option<String>,

    /// Directory backup archives are acquired into. Read from PHONE_SYNC_BACKUP_DIR.
    pub backup_dir: Option<String>,

    /// Use the mock device gateway instead of external tooling. Read from
    /// PHONE_SYNC_USE_MOCK_DEVICES.
    #[serde(default)]
    pub use_mock_devices: Option<bool>,

    /// Path to the device listing tool. Read from PHONE_SYNC_LIST_TOOL.
    #[serde(default)]
    pub list_tool: Option<String>,

    /// Path to the backup tool. Read from PHONE_SYNC_BACKUP_TOOL.
    #[serde(default)]
    pub backup_tool: Option<String>,

    /// Device detection polling interval in ms (default 2000). Read from
    /// PHONE_SYNC_POLL_INTERVAL_MS.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Cooldown between identical sync requests in seconds (default 10).
    /// Read from PHONE_SYNC_COOLDOWN_SECS.
    #[serde(default)]
    pub cooldown_secs: Option<u64>,

    /// Seconds without a phase transition before a running session counts as
    /// stuck (default 120). Read from PHONE_SYNC_STUCK_THRESHOLD_SECS.
    #[serde(default)]
    pub stuck_threshold_secs: Option<u64>,

    /// Records per persistence batch (default 500). Read from PHONE_SYNC_BATCH_SIZE.
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// UI event channel capacity. Read from PHONE_SYNC_EVENT_QUEUE_SIZE.
    #[serde(default)]
    pub event_queue_size: Option<usize>,

    /// Parser rows between cancellation checks (default 2000). Read from
    /// PHONE_SYNC_PARSE_CHUNK_SIZE.
    #[serde(default)]
    pub parse_chunk_size: Option<usize>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        c = c.add_source(config::Environment::with_prefix("PHONE_SYNC"));
        if let Ok(path) = std::env::var("PHONE_SYNC_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        c.build()?.try_deserialize()
    }

    pub fn data_dir_or_default(&self) -> String {
        self.data_dir.clone().unwrap_or_else(|| "./data".into())
    }

    pub fn backup_dir_or_default(&self) -> String {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| "./data/backups".into())
    }

    pub fn use_mock_devices(&self) -> bool {
        // Mock is also the fallback when no tooling is configured.
        self.use_mock_devices
            .unwrap_or_else(|| self.list_tool.is_none() || self.backup_tool.is_none())
    }

    pub fn list_tool_or_default(&self) -> String {
        self.list_tool
            .clone()
            .unwrap_or_else(|| "idevice_id".into())
    }

    pub fn backup_tool_or_default(&self) -> String {
        self.backup_tool
            .clone()
            .unwrap_or_else(|| "idevicebackup2".into())
    }

    /// Defaults to 2000 ms if unset.
    pub fn poll_interval_ms_or_default(&self) -> u64 {
        self.poll_interval_ms.unwrap_or(2000)
    }

    /// Defaults to 10 s if unset.
    pub fn cooldown_secs_or_default(&self) -> u64 {
        self.cooldown_secs.unwrap_or(10)
    }

    /// Defaults to 120 s if unset.
    pub fn stuck_threshold_secs_or_default(&self) -> u64 {
        self.stuck_threshold_secs.unwrap_or(120)
    }

    /// Defaults to 500 records if unset.
    pub fn batch_size_or_default(&self) -> usize {
        self.batch_size.unwrap_or(500)
    }

    pub fn event_queue_size_or_default(&self) -> usize {
        self.event_queue_size.unwrap_or(DEFAULT_EVENT_QUEUE_SIZE)
    }

    /// Defaults to 2000 rows if unset.
    pub fn parse_chunk_size_or_default(&self) -> usize {
        self.parse_chunk_size.unwrap_or(2000)
    }
}
