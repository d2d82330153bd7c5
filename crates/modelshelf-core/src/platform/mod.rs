//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here rather than in the
//! library modules.

pub mod links;

pub use links::{is_symlink, path_present, remove_if_present, replace_file_symlink};
