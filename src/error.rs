//! Muninn error types

/// Muninn error types
///
/// Malformed cache keys, relation cycles and aggregates that cannot be
/// patched are not errors: they surface as `None` or "leave untouched"
/// outcomes so that unrelated cache entries never cause a failure.
#[derive(Debug, thiserror::Error)]
pub enum MuninnError {
    // Schema errors
    #[error("model not found in schema: {0}")]
    UnknownModel(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    // Mutation errors
    #[error("unknown write operation: {0}")]
    UnknownOperation(String),

    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    // Collaborator errors, surfaced to the mutation caller as-is
    /// The host cache adapter failed (e.g. an invalidation was rejected).
    #[error("cache adapter error: {0}")]
    Adapter(String),

    /// A user-supplied optimistic data provider failed.
    #[error("optimistic data provider error: {0}")]
    Provider(String),
}

impl MuninnError {
    /// Whether the error originated in caller-supplied code (the cache adapter
    /// or an optimistic data provider) rather than in the engine's inputs.
    ///
    /// The engine never retries these; retry policy belongs to the host's
    /// mutation-execution layer.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Adapter(_) | Self::Provider(_))
    }
}

impl From<toml::de::Error> for MuninnError {
    fn from(err: toml::de::Error) -> Self {
        MuninnError::Config(err.to_string())
    }
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
