//! Error types for presence-core operations.
//!
//! Nothing in the engine is fatal to the process: tick-level failures are
//! recorded in the poll status and the tick is skipped. These types exist so
//! callers (the daemon CLI, tests) can tell failures apart.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Upstream Fetch Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Classified failure of an authenticated upstream request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Malformed upstream response: {0}")]
    Decode(String),
}

impl FetchError {
    /// True when the external OAuth collaborator needs to re-authenticate.
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Corrupt record {key}: {details}")]
    Corrupt { key: String, details: String },

    #[error("Failed to serialize record {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Crate Error
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors surfaced by presence-core operations.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid time zone: {0}")]
    InvalidTimeZone(String),

    #[error("Invalid target: {0:?}")]
    InvalidTarget(String),

    #[error("Target not found upstream: {0}")]
    TargetNotFound(String),

    #[error("Home directory not found; pass --root or set PRESENCE_HOME")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration read failed: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using PresenceError.
pub type Result<T> = std::result::Result<T, PresenceError>;

impl From<PresenceError> for String {
    fn from(err: PresenceError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_flagged_for_reauth() {
        assert!(FetchError::Unauthorized("expired".into()).is_auth());
        assert!(!FetchError::Transport("reset".into()).is_auth());
        assert!(!FetchError::RateLimited {
            retry_after_secs: Some(3)
        }
        .is_auth());
    }

    #[test]
    fn fetch_error_converts_into_crate_error() {
        let err: PresenceError = FetchError::Upstream {
            status: 500,
            body: "boom".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Upstream error 500: boom");
    }
}
