//! Shared infrastructure utilities for Vouch.
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename)
//! - **`fs_age`**: Owner-only directories and newest-modification lookups

pub mod atomic_write;
pub mod fs_age;

pub use atomic_write::{atomic_write, stage_bytes};
pub use fs_age::{ensure_private_dir, newest_mtime};
