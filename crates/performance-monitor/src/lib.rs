//! Performance measurement for the benchmark worker
//!
//! This crate samples process resource usage, summarizes timing samples and
//! drives repeated inference passes over a loaded model.

pub mod benchmark;
pub mod gpu;
pub mod sampler;
pub mod statistics;

// Re-export commonly used types
pub use benchmark::{BenchmarkEngine, BenchmarkError, Benchmarkable, Stopwatch, WallClock};
pub use gpu::{probe_for, GpuProbe, NoGpuProbe, NvidiaSmiProbe};
pub use sampler::{ResourceSampler, ResourceUsage, SamplingSession};
pub use statistics::summarize;
