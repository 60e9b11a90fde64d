//! Utility functions for string formatting and manipulation.

pub mod format;

pub use format::{format_timestamp, mask_token, normalize_path, truncate_string};
