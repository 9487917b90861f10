//! phone-sync: phone backup ingestion with Hexagonal Architecture.
//!
//! Detects attached devices, acquires (and if needed decrypts) their backups,
//! parses messages/contacts/conversations out of them and persists the records
//! idempotently, streaming progress events to a single UI subscriber.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
