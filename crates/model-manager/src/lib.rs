//! Model management for the benchmark worker
//!
//! This crate turns a job's model reference into a model resident on a
//! compute unit: it fetches the artifact (local path or HTTP download),
//! picks the inference engine, and records how long the load took and how
//! much memory it needed.

pub mod downloader;
pub mod handle;
pub mod loader;

// Re-export commonly used types
pub use downloader::{Artifact, ArtifactFetcher};
pub use handle::ModelHandle;
pub use loader::ModelLoader;
