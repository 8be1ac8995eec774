//! Orchestrator client for the benchmark worker
//!
//! Registration, status updates, heartbeats and job lookups against the
//! orchestrator's HTTP API. The agent talks to [`OrchestratorApi`] so tests
//! can substitute an in-process fake.

pub mod api;
pub mod http;

// Re-export commonly used types
pub use api::{OrchestratorApi, RegistrationRequest};
pub use http::HttpOrchestratorClient;
