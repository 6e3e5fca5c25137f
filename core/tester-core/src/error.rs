//! Error types for tester-core operations.
//!
//! Every public operation returns a typed outcome; nothing in this crate
//! panics on a failure path. User-visible failures are surfaced by the CLI,
//! everything else degrades gracefully and keeps monitoring alive.

use std::path::PathBuf;

/// All errors that can occur in tester-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TesterError {
    // ─────────────────────────────────────────────────────────────────────
    // I/O and serialization
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Data file state
    // ─────────────────────────────────────────────────────────────────────
    #[error("data file corrupted: {path}: {details}")]
    Corrupt { path: PathBuf, details: String },

    #[error("data file unrecoverable; unreadable file preserved at {quarantined}")]
    Unrecoverable { quarantined: PathBuf },

    #[error("data file written by a newer producer (data_version {found}, supported {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    // ─────────────────────────────────────────────────────────────────────
    // Session store ordering
    // ─────────────────────────────────────────────────────────────────────
    #[error("laptop {0} has a test run already in progress")]
    DuplicateInProgress(String),

    #[error("laptop {0} is not registered in the data file")]
    LaptopUnknown(String),

    #[error("laptop {0} has no test run in progress")]
    NoActiveRun(String),

    // ─────────────────────────────────────────────────────────────────────
    // Pre-test validation
    // ─────────────────────────────────────────────────────────────────────
    #[error("pre-test validation failed: {}", errors.join("; "))]
    ValidationFailed { errors: Vec<String> },
}

/// Convenience type alias for Results using TesterError.
pub type Result<T> = std::result::Result<T, TesterError>;

impl TesterError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TesterError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        TesterError::Json {
            context: context.into(),
            source,
        }
    }
}
