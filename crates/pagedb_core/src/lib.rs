//! # PageDB Core
//!
//! Core engine for PageDB, an embedded page-oriented storage engine.
//!
//! This crate provides:
//! - Write-ahead logging of committed page images and crash recovery
//! - On-demand and shutdown checkpoints folding the log into the data file
//! - Shared/exclusive page locks with bounded waits
//! - An asynchronous durable write queue and a page cache
//! - Page-level transactions and an orchestrated engine lifecycle

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod disk;
mod engine;
mod error;
mod header;
mod lock;
mod stats;
mod transaction;
mod types;
pub mod wal;

pub use config::{DataSource, EngineSettings, MEMORY_MARKER, TEMP_MARKER};
pub use disk::{DiskService, PageBuffer, StartupReader};
pub use engine::Engine;
pub use error::{CoreError, CoreResult};
pub use header::{HeaderCell, HeaderPage, FILE_VERSION, FREE_DATA_SLOTS, HEADER_MAGIC};
pub use lock::{LockGuard, LockKey, LockMode, LockService};
pub use stats::EngineStats;
pub use transaction::{SignalOutcome, Transaction, TransactionRegistry, TransactionState};
pub use types::{PageId, TransactionId, Version, PAGE_SIZE};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
