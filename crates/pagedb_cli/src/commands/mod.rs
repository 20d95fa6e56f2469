//! CLI command implementations.

pub mod checkpoint;
pub mod inspect;
pub mod verify;
