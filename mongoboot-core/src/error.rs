use thiserror::Error;

/// Convenience alias for bootstrap results.
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Errors raised while loading a manifest or applying it to a database.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The administrative connection failed or a command never reached the
    /// server. Every bootstrap step is idempotent, so the caller may rerun
    /// the whole manifest after the connection recovers.
    #[error("database unavailable during {operation}")]
    Connection {
        /// Operation identifier.
        operation: &'static str,
        /// Source driver error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// An index already exists under the requested name (or key pattern)
    /// with a different definition. Requires manual reconciliation.
    #[error("index conflict on {collection}.{index}: {reason}")]
    IndexConflict {
        /// Collection carrying the conflicting index.
        collection: String,
        /// Index name as it would be created.
        index: String,
        /// What differed.
        reason: String,
    },
    /// The manifest itself is malformed. Raised strictly before any
    /// database call is issued.
    #[error("invalid manifest: {detail}")]
    InvalidSpec {
        /// What the author got wrong.
        detail: String,
    },
}

impl BootstrapError {
    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidSpec {
            detail: detail.into(),
        }
    }

    /// Whether rerunning the whole manifest can succeed without any manual
    /// intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
