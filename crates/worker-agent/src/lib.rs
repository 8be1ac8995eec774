//! Worker agent for the benchmark worker
//!
//! The agent registers the worker, then runs two activities until shutdown:
//! the job loop, which claims one job at a time and drives the model loader
//! and benchmark engine, and the heartbeat ticker. The job loop is the only
//! writer of the worker status; every transition is pushed to the
//! orchestrator by a separate reporter task.

pub mod agent;
pub mod heartbeat;
pub mod job;
pub mod registration;
pub mod reporter;
pub mod shutdown;
pub mod status;

// Re-export commonly used types
pub use agent::{AgentReport, AgentSettings, WorkerAgent};
pub use heartbeat::HeartbeatTask;
pub use registration::register_with_retry;
pub use shutdown::install_shutdown_handler;
pub use status::{status_channel, StatusReader, StatusWriter};
