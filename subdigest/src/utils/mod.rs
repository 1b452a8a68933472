//! Utility functions for timestamps and file naming.

mod paths;
pub mod timestamps;

pub use paths::sanitize_filename;
pub use timestamps::{elapsed_ms, now_utc, Timestamp};
