//! Engine statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = engine.stats()?;
//! println!("logged pages: {}", stats.logged_pages);
//! println!("{}", serde_json::to_string_pretty(&stats)?);
//! ```

use serde::Serialize;

/// Point-in-time snapshot of an engine's gauges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Pooled page buffers currently handed out.
    pub pages_in_use: usize,
    /// Queued writes not yet durable.
    pub queue_length: usize,
    /// Pages whose latest image lives in the log.
    pub logged_pages: usize,
    /// Log length in bytes.
    pub log_length: u64,
    /// Data file length in bytes.
    pub data_length: u64,
    /// Page count recorded in the header.
    pub page_count: u32,
    /// Live transactions.
    pub active_transactions: usize,
    /// Version of the latest confirmed transaction.
    pub version: u64,
}
