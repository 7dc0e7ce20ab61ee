//! Error types for the spam pipeline.

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors returned by the external collaborators (lookup, fetch, classify).
///
/// Stages swallow these locally; they surface only through a `DropHook`,
/// never through `Error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("Service {service} unavailable: {reason}")]
    Unavailable { service: String, reason: String },

    #[error("Service {service} rate limited: {in_flight} requests in flight, {limit} allowed")]
    RateLimited {
        service: String,
        in_flight: usize,
        limit: usize,
    },
}

/// Orchestrator-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Stage {stage} panicked: {reason}")]
    StagePanicked { stage: String, reason: String },

    #[error("Stage {stage} was cancelled")]
    StageCancelled { stage: String },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
