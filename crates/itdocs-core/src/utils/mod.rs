//! Utility functions for string formatting and token redaction.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{age_display, format_optional, redact_token, truncate};
