//! Error types for cover system construction

/// Errors that can occur while configuring or starting the cover system
///
/// Runtime operations (queries, reservations, generation) never return
/// errors: they report failure through `bool`, `Option` or empty results.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum CoverError {
    /// Configuration validation failed
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The generation worker pool could not be created
    #[error("worker pool unavailable: {0}")]
    WorkerPool(String),

    /// The store was already torn down
    #[error("cover store is shut down")]
    ShutDown,
}

/// Result type alias for cover system operations
pub type Result<T> = std::result::Result<T, CoverError>;
