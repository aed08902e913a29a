//! Failure diagnostics for tool results.

pub mod classifier;

pub use classifier::{ErrorInfo, ErrorType, extract_error_info};
