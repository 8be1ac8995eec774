//! Common utilities and types for the benchmark worker
//!
//! This crate provides functionality shared by every worker component,
//! including the error taxonomy, the job and result data model, the retry
//! policy and small formatting helpers.

pub mod error;
pub mod models;
pub mod retry;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{Error, Result};
pub use models::*;
pub use retry::RetryPolicy;
pub use types::*;
