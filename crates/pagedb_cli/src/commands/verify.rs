//! Verify command implementation.

use pagedb_core::wal::LogRecordIterator;
use pagedb_core::{DataSource, HeaderPage, TransactionId, PAGE_SIZE};
use pagedb_storage::{FileBackend, StorageBackend};
use std::collections::HashMap;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Page count from a valid header, if the header parsed.
    pub page_count: Option<u32>,
    /// Number of valid log records.
    pub records: usize,
    /// Number of confirmed transactions.
    pub confirmed_transactions: usize,
    /// Records of transactions that never confirmed.
    pub unconfirmed_records: usize,
    /// Bytes of a damaged tail the engine would drop on open.
    pub damaged_tail: Option<u64>,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying data file {}", path.display());
    println!();

    let result = verify(path)?;
    match result.page_count {
        Some(count) => println!("Header: ok, {count} pages"),
        None => println!("Header: invalid"),
    }
    println!("Log records:              {}", result.records);
    println!("Confirmed transactions:   {}", result.confirmed_transactions);
    println!("Unconfirmed records:      {}", result.unconfirmed_records);
    if let Some(len) = result.damaged_tail {
        println!("Damaged tail:             {len} bytes (dropped on next open)");
    }
    for error in &result.errors {
        println!("  ERROR: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Verification passed");
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err("Verification failed".into())
    }
}

/// Checks the header page and every log record without opening an engine.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();

    let data = FileBackend::open_read_only(path)?;
    if data.size()? < PAGE_SIZE as u64 {
        result.errors.push("data file is shorter than one page".to_string());
    } else {
        match HeaderPage::decode(&data.read_at(0, PAGE_SIZE)?) {
            Ok(header) => result.page_count = Some(header.page_count),
            Err(e) => result.errors.push(format!("header: {e}")),
        }
    }

    let Some(log_path) = DataSource::File(path.to_path_buf()).log_path() else {
        return Ok(result);
    };
    if !log_path.exists() {
        return Ok(result);
    }

    let log = FileBackend::open_read_only(&log_path)?;
    let mut iter = LogRecordIterator::new(&log)?;
    let mut pending: HashMap<TransactionId, usize> = HashMap::new();
    for item in &mut iter {
        match item {
            Ok((_, record)) => {
                result.records += 1;
                if record.confirmed {
                    pending.remove(&record.txn_id);
                    result.confirmed_transactions += 1;
                } else {
                    *pending.entry(record.txn_id).or_default() += 1;
                }
            }
            Err(e) => result.errors.push(format!("log: {e}")),
        }
    }
    result.unconfirmed_records = pending.values().sum();
    result.damaged_tail = iter.damaged_tail().map(|tail| tail.len);
    Ok(result)
}
