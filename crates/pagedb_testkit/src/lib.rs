//! # PageDB Testkit
//!
//! Test utilities for PageDB.
//!
//! This crate provides:
//! - Engine fixtures backed by temporary directories
//! - Crash simulation helpers that damage the log like an interrupted write
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagedb_testkit::prelude::*;
//!
//! #[test]
//! fn survives_reopen() {
//!     let mut test = TestEngine::file();
//!     let pages = write_filled_pages(&test, &[1, 2]);
//!     test.reopen();
//!     assert_eq!(read_fill(&test, pages[0]), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
