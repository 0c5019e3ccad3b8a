//! Error types for pgendpoint
//!
//! Probe-local failures never appear here: they are folded into
//! [`crate::model::ProbeOutcome::Unknown`] by the prober. What remains are the
//! run-level conditions and adapter failures.

/// Application-specific error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointManagerError {
    #[error("no PostgreSQL nodes configured and no stored topology to fall back on")]
    NoNodesConfigured,

    #[error("no primary found among {checked} checked nodes ({standbys} standbys)")]
    NoPrimaryFound { checked: usize, standbys: usize },

    #[error("endpoint publish failed (rw_ok={rw_ok}, ro_ok={ro_ok})")]
    PublishFailed { rw_ok: bool, ro_ok: bool },

    #[error("registry error: {0}")]
    Registry(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EndpointManagerError {
    /// Short stable label for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            EndpointManagerError::NoNodesConfigured => "no_nodes_configured",
            EndpointManagerError::NoPrimaryFound { .. } => "no_primary_found",
            EndpointManagerError::PublishFailed { .. } => "publish_failed",
            EndpointManagerError::Registry(_) => "registry",
            EndpointManagerError::Database(_) => "database",
            EndpointManagerError::Config(_) => "config",
        }
    }

    /// Whether retrying the same operation can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EndpointManagerError::Registry(_) | EndpointManagerError::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EndpointManagerError>;
