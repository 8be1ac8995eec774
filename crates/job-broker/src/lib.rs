//! Job broker client for the benchmark worker
//!
//! Jobs are claimed from capability-keyed queues with at-least-once
//! semantics: a claimed entry sits in the worker's processing list until it
//! is acknowledged or requeued. Results are pushed to a single results queue.

pub mod broker;
pub mod memory;
pub mod redis_broker;

// Re-export commonly used types
pub use broker::{Claim, JobBroker, QueueLayout};
pub use memory::InMemoryBroker;
pub use redis_broker::RedisBroker;
