//! # PageDB Storage
//!
//! Storage backend trait and implementations for PageDB.
//!
//! This crate provides the lowest-level storage abstraction for PageDB.
//! Storage backends are **opaque byte stores** - they do not interpret
//! the data they store. Pages, log records and the header layout all live
//! in `pagedb_core`.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (positional read/write, append, flush)
//! - No knowledge of page layouts or the write-ahead log format
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and the non-persistent engines
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use pagedb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
