// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Lightmeter delivery tracker.

use thiserror::Error;

/// The error type shared by every tracker crate.
///
/// Gap and unsupported records never surface as errors: the state machine
/// logs and drops them. Anything that does reach a caller as a
/// `TrackerError` aborts the current batch.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Configuration errors (invalid values, unusable filter patterns).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (connection, query failure, I/O).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Schema migration failed while opening the store.
    #[error("migration error: {source}")]
    Migration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A programming invariant was violated (negative usage count,
    /// duplicated result key, unknown key id). Fatal.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The payload variant has no tracking semantics.
    #[error("unsupported action type: {kind}")]
    UnsupportedAction { kind: &'static str },

    /// The intake channel was closed by a shutdown.
    #[error("intake channel is closed")]
    IntakeClosed,

    /// The downstream result consumer went away.
    #[error("result publisher is closed")]
    PublisherClosed,

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        TrackerError::Storage {
            source: Box::new(e),
        }
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Internal(format!("json encoding: {e}"))
    }
}

impl TrackerError {
    /// Convenience constructor for invariant violations.
    pub fn invariant(message: impl Into<String>) -> Self {
        TrackerError::Invariant(message.into())
    }

    /// Whether the error must terminate the process rather than just the loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrackerError::Invariant(_))
    }
}
