//! Property-based test generators using proptest.
//!
//! Provides strategies for generating page-level workloads.

use proptest::prelude::*;

/// One committed transaction of a workload: `(page slot, fill byte)` pairs.
///
/// Slots index into a fixed set of pre-allocated pages, so any slot is a
/// valid page once the workload's pages exist.
pub type TransactionWrites = Vec<(usize, u8)>;

/// Strategy for one transaction writing 1..=`max_writes` of `slots` pages.
pub fn transaction_writes_strategy(
    slots: usize,
    max_writes: usize,
) -> impl Strategy<Value = TransactionWrites> {
    prop::collection::vec((0..slots, any::<u8>()), 1..=max_writes)
}

/// Strategy for a workload of 1..=`max_txns` committed transactions.
pub fn workload_strategy(
    slots: usize,
    max_txns: usize,
) -> impl Strategy<Value = Vec<TransactionWrites>> {
    prop::collection::vec(transaction_writes_strategy(slots, 4), 1..=max_txns)
}

/// Strategy for the number of bytes a torn final record keeps.
pub fn torn_length_strategy() -> impl Strategy<Value = usize> {
    1..pagedb_core::wal::RECORD_SIZE
}

/// Expected fill per slot after applying `workload` in order; later
/// writes win, including within one transaction.
pub fn expected_fills(slots: usize, initial: u8, workload: &[TransactionWrites]) -> Vec<u8> {
    let mut fills = vec![initial; slots];
    for txn in workload {
        for (slot, fill) in txn {
            fills[*slot] = *fill;
        }
    }
    fills
}
