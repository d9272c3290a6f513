//! Utility functions for common operations.
//!
//! - **Atomic file writes**: temp file, fsync, rename

mod fs;

pub use fs::atomic_write;
