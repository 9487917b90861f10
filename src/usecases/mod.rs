//! Use cases: application services orchestrating ports.

pub mod controller;
pub mod device_watcher;
pub mod orchestrator;
pub mod persist_writer;
pub mod rate_limiter;

pub use controller::SyncController;
pub use device_watcher::DeviceWatcher;
pub use orchestrator::SyncOrchestrator;
pub use persist_writer::{PersistProgress, PersistWriter};
pub use rate_limiter::{RateDecision, RateLimiter};
