//! Hardware detection for the benchmark worker
//!
//! This crate enumerates the compute units the worker can execute models on
//! and collects the host description sent at registration. Detection only
//! performs local queries; it never touches the network.

pub mod detector;
pub mod gpu;
pub mod host;

// Re-export commonly used types
pub use detector::{CapabilityDetector, DetectionReport};
pub use gpu::DiscreteGpu;
pub use host::SystemSnapshot;
