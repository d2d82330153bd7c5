//! JSON persistence.
//!
//! This module provides:
//! - Atomic JSON file operations (temp file, fsync, rename)
//! - A read-through document cache keyed by file path

mod atomic;
mod json_cache;

pub use atomic::{atomic_read_json, atomic_write_json};
pub use json_cache::JsonCache;
