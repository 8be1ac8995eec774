//! Worker error taxonomy
//!
//! Shared by every worker component.
//! Job-scoped errors are reported to the orchestrator and never stop the
//! worker; environment- and identity-level errors are fatal.

use thiserror::Error;

use crate::models::WorkerStatus;

/// Result type for worker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for worker operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local hardware or OS information could not be determined
    #[error("Environment error: {0}")]
    Environment(String),

    /// The orchestrator is unreachable or rejected this worker's identity
    #[error("Registration error: {0}")]
    Registration(String),

    /// The model artifact could not be fetched, parsed or placed on the compute unit
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// An inference pass failed
    #[error("Inference error after {completed_runs} completed runs: {message}")]
    Inference {
        /// Description of the failure
        message: String,
        /// Number of passes that completed before the failure
        completed_runs: usize,
    },

    /// The job queue is unreachable or rejected a command
    #[error("Broker error: {0}")]
    Broker(String),

    /// A heartbeat could not be delivered
    #[error("Heartbeat error: {0}")]
    Heartbeat(String),

    /// Transport-level failure talking to the orchestrator
    #[error("HTTP error: {0}")]
    Http(String),

    /// The orchestrator does not know the job a queue entry names
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// The job targets a compute unit this worker does not offer
    #[error("Unsupported compute unit: {0}")]
    UnsupportedComputeUnit(String),

    /// The worker status state machine refused a transition
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status before the attempted transition
        from: WorkerStatus,
        /// Requested status
        to: WorkerStatus,
    },

    /// Work stopped because shutdown was requested
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wire classification attached to failed job results
    pub fn class(&self) -> &'static str {
        match self {
            Error::Io(_) => "IoError",
            Error::Serialization(_) => "SerializationError",
            Error::Config(_) => "ConfigError",
            Error::Environment(_) => "EnvironmentError",
            Error::Registration(_) => "RegistrationError",
            Error::ModelLoad(_) => "ModelLoadError",
            Error::Inference { .. } => "InferenceError",
            Error::Broker(_) => "BrokerError",
            Error::Heartbeat(_) => "HeartbeatError",
            Error::Http(_) => "HttpError",
            Error::UnknownJob(_) => "UnknownJob",
            Error::UnsupportedComputeUnit(_) => "UnsupportedComputeUnit",
            Error::InvalidTransition { .. } => "InvalidTransition",
            Error::Interrupted(_) => "Interrupted",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Returns true if the error must stop the worker process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Environment(_) | Error::Registration(_) | Error::InvalidTransition { .. }
        )
    }

    /// Returns true if the error only affects the job being executed
    pub fn is_job_scoped(&self) -> bool {
        matches!(
            self,
            Error::ModelLoad(_) | Error::Inference { .. } | Error::UnknownJob(_) | Error::UnsupportedComputeUnit(_)
        )
    }

    /// Returns true if the orchestrator could not be reached or answered
    /// with a server-side failure
    pub fn is_transient_http(&self) -> bool {
        matches!(self, Error::Http(_))
    }

    /// Returns true if the error is a broker error
    pub fn is_broker(&self) -> bool {
        matches!(self, Error::Broker(_))
    }

    /// Returns true if the error signals a requested shutdown
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted(_))
    }
}
