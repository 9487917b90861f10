//! Infrastructure adapters: device tooling, archive handling, persistence,
//! identity, UI.

pub mod backup;
pub mod device;
pub mod identity;
pub mod persistence;
pub mod ui;
