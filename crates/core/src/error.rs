//! Unified error types for hoard.
//!
//! Every variant renders with a stable code prefix so callers (and MCP
//! clients) can match on the kind without parsing the message.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the resource cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URI could not be parsed at all.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Only http and https resources can be cached.
    #[error("INVALID_SCHEME: {0}")]
    InvalidScheme(String),

    /// Directory-like URIs (trailing `/`) cannot be stored as a single file.
    #[error("PATH_IS_DIRECTORY: {0}")]
    PathIsDirectory(String),

    /// The cache root or an entry file could not be created or opened.
    #[error("STORAGE_UNAVAILABLE: {0}")]
    StorageUnavailable(String),

    /// The metadata store carries a schema version this build does not know.
    #[error("UNSUPPORTED_SCHEMA_VERSION: {0}")]
    UnsupportedSchemaVersion(i64),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Filesystem or lock operation failed on an entry file.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// The upstream server answered with a non-success status or the
    /// transfer broke off.
    #[error("UPSTREAM_ERROR: {0}")]
    UpstreamError(String),

    /// Fetch timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// Zero-length bodies are reserved as the "not yet populated" marker.
    #[error("EMPTY_RESOURCE_UNSUPPORTED: {0}")]
    EmptyResourceUnsupported(String),

    /// The cache root is not under a recognised packaged-storage location.
    #[error("UNSUPPORTED_ROOT_LOCATION: {0}")]
    UnsupportedRootLocation(String),

    /// The resolve loop kept finding the entry stale. Indicates a bug.
    #[error("ORCHESTRATOR_LOOP_EXCEEDED: {key} still unresolved after {attempts} attempts")]
    OrchestratorLoopExceeded { key: String, attempts: usize },
}

impl Error {
    /// Whether SQLite refused the statement because another connection held
    /// the database.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Database(tokio_rusqlite::Error::Error(rusqlite::Error::SqliteFailure(e, _))) => {
                matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidUrl(_) | Error::InvalidScheme(_) | Error::PathIsDirectory(_) => -32602,
            Error::StorageUnavailable(_) => -32020,
            Error::UnsupportedSchemaVersion(_) | Error::MigrationFailed(_) | Error::Database(_) => -32002,
            Error::Io(_) => -32021,
            Error::UpstreamError(_) => -32008,
            Error::FetchTimeout(_) => -32006,
            Error::FetchTooLarge(_) => -32007,
            Error::EmptyResourceUnsupported(_) => -32022,
            Error::UnsupportedRootLocation(_) => -32023,
            Error::OrchestratorLoopExceeded { .. } => -32603,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PathIsDirectory("example.com/docs/".to_string());
        assert!(err.to_string().starts_with("PATH_IS_DIRECTORY"));
        assert!(err.to_string().contains("example.com/docs/"));
    }

    #[test]
    fn test_loop_exceeded_display() {
        let err = Error::OrchestratorLoopExceeded { key: "example.com/a".into(), attempts: 10 };
        assert_eq!(
            err.to_string(),
            "ORCHESTRATOR_LOOP_EXCEEDED: example.com/a still unresolved after 10 attempts"
        );
    }

    #[test]
    fn test_busy_detection() {
        let busy = Error::from(rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(5), None));
        assert!(busy.is_busy());

        let constraint = Error::from(rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(19), None));
        assert!(!constraint.is_busy());
        assert!(!Error::UpstreamError("status 503".into()).is_busy());
    }

    #[test]
    fn test_error_to_mcp_error() {
        let err = Error::InvalidScheme("ftp".to_string());
        let mcp_err: McpError = err.into();
        assert_eq!(mcp_err.code.0, -32602);

        let err = Error::UpstreamError("status 404".to_string());
        let mcp_err: McpError = err.into();
        assert_eq!(mcp_err.code.0, -32008);
        assert!(mcp_err.message.contains("status 404"));
    }
}
