//! The closed set of failure kinds surfaced by an export run.
//!
//! Stages translate lower-level faults into one of these kinds and fail
//! fast; the orchestrator reports the first error, never the cascade.

/// Result alias used throughout the workspace.
pub type Result<T, E = ExportError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("security violation: {0}")]
    Security(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("output error: {0}")]
    Output(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExportError {
    /// Short kind tag for the single-line stderr report.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::Config(_) => "config",
            ExportError::Connection(_) => "connection",
            ExportError::Query(_) => "query",
            ExportError::Permission(_) => "permission",
            ExportError::Security(_) => "security",
            ExportError::Schema(_) => "schema",
            ExportError::Output(_) => "output",
            ExportError::Transform(_) => "transform",
            ExportError::Cancelled => "cancelled",
            ExportError::Internal(_) => "internal",
        }
    }

    /// Process exit code: 2 for security violations, 130 for user
    /// cancellation, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExportError::Security(_) => 2,
            ExportError::Cancelled => 130,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Output(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(ExportError::Security("x".into()).exit_code(), 2);
        assert_eq!(ExportError::Cancelled.exit_code(), 130);
        assert_eq!(ExportError::Config("x".into()).exit_code(), 1);
        assert_eq!(ExportError::Output("x".into()).exit_code(), 1);
    }
}
