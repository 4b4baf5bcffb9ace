//! # Error Handling for tdlink
//!
//! This module defines the error types used throughout tdlink. A single error
//! enum ([`Error`]) covers every failure a submitted statement can end with,
//! which keeps the completion handle's output type simple.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations.
//! This provides:
//! - Automatic `Display` implementation from the `#[error(...)]` attributes
//! - Less boilerplate than hand-written `impl Display` blocks
//!
//! ## Why is `Error` Clone?
//!
//! When a combined request fails, every statement that was merged into it
//! receives the same error. Fan-out hands each waiting caller its own copy, so
//! the error must be cheap to clone. Foreign errors (`reqwest`, `serde_json`) are
//! not `Clone`, so they are converted to their message at the boundary.
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Transport | `Transport`, `HttpStatus` | Check connectivity, retry later |
//! | Domain | `Server`, `Decode` | Fix the statement or the server state |
//! | Programming | `MalformedInsert` | Fix the statement builder |
//! | Lifecycle | `Shutdown`, `Overloaded`, `Dropped`, `Internal` | Stop submitting / back off |
//! | Configuration | `Config` | Fix the connection settings |

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur while submitting and executing statements.
///
/// # Example
///
/// ```rust
/// use tdlink::Error;
///
/// let err = Error::Server { code: 0x2603, desc: "Table does not exist".to_string() };
/// assert_eq!(err.to_string(), "server rejected statement (code 9731): Table does not exist");
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // =========================================================================
    // Transport Errors
    // =========================================================================

    /// The request never produced an HTTP response.
    ///
    /// Connection refused, DNS failure, timeout, or a broken body stream.
    #[error("transport error: {message}")]
    Transport {
        /// Message of the underlying HTTP client error.
        message: String,
    },

    /// The server answered with a non-success HTTP status and no parseable
    /// response envelope.
    #[error("http status {status}: {}", reason.as_deref().unwrap_or("unknown"))]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase, if known.
        reason: Option<String>,
    },

    // =========================================================================
    // Domain Errors
    // =========================================================================

    /// The server parsed the request and rejected it.
    ///
    /// # When This Happens
    ///
    /// The response envelope carried a `code` other than 0. For a combined
    /// insert this means the whole group was rejected; the server does not say
    /// which row caused it.
    #[error("server rejected statement (code {code}): {desc}")]
    Server {
        /// Status code from the response envelope.
        code: i32,
        /// Description from the response envelope.
        desc: String,
    },

    /// A success response whose body is not a valid envelope.
    #[error("failed to decode response: {message}")]
    Decode {
        /// Parser message.
        message: String,
    },

    // =========================================================================
    // Programming Errors
    // =========================================================================

    /// An insertion statement does not have the single-row shape required for
    /// merging.
    ///
    /// Raised at construction time, before the statement ever reaches the
    /// queue, so a combined payload is never built from it.
    #[error("malformed insert statement: {reason}")]
    MalformedInsert {
        /// What was wrong with the statement.
        reason: String,
    },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================

    /// The dispatcher shut down before the statement was dispatched.
    #[error("dispatcher has shut down")]
    Shutdown,

    /// The queue limit was reached and the statement was shed.
    #[error("dispatcher overloaded: {limit} statements already queued")]
    Overloaded {
        /// The configured queue limit.
        limit: usize,
    },

    /// The completion handle lost its sender without a result.
    #[error("dispatcher dropped the completion handle")]
    Dropped,

    /// A flush task failed unexpectedly (for example, it panicked).
    #[error("internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================

    /// Invalid connection or dispatcher configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true for failures that happened before the server saw the
    /// request, where resubmitting the statement is reasonable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::Overloaded { .. } | Error::HttpStatus { status: 502..=504, .. }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode {
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
