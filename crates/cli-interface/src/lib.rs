//! Command-line interface for the benchmark worker
//!
//! `info`, `validate`, `test`, `enroll` and `start` share one set of global
//! flags that form the last configuration layer.

pub mod cli;
pub mod commands;

// Re-export commonly used types
pub use cli::{Cli, Command, GlobalArgs};
pub use commands::run;
