//! Foundational low-level utilities shared across Gatekeeper crates.
//!
//! Provides the atomic file-write helper used for gateway state files and the
//! clock helper used when stamping persisted gateway state.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::current_unix_timestamp_ms;
