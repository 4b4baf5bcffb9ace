//! # tdlink - Coalescing REST Client for TDengine
//!
//! tdlink sends SQL to a TDengine server over its REST endpoint. Its write
//! path merges insertions that arrive close together into one request:
//!
//! - **Insert coalescing**: `INSERT INTO a ...` and `INSERT INTO b ...` go out
//!   as `INSERT INTO a ... b ...;`
//! - **Bounded requests**: merged bodies stay under the server's payload limit
//! - **Shared outcomes**: every member of a merged request gets the same result
//! - **Everything else stands alone**: queries and DDL always get their own request
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Async API Layer                          │
//! │               (insert, query, execute, shutdown)                │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ submit()
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Dispatcher Loop                            │
//! │                (single task, owns the insert group)             │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐ │
//! │  │ Insert Group│  │  Flush      │  │  Other statements       │ │
//! │  │ Accumulator │  │  Triggers   │  │  (one request each)     │ │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Transport (REST over reqwest)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Resolved once**: every submitted statement's completion resolves exactly once
//! 2. **Bounded body**: a merged body, times the safety margin, never exceeds the payload limit
//! 3. **Bounded wait**: an insertion waits at most the flush interval before being sent
//! 4. **Isolation of others**: non-insert statements are never merged
//! 5. **Group order**: insert groups reach the server in the order they were flushed
//!
//! ## Module Organization
//!
//! - [`error`]: Error type for every failure mode
//! - [`types`]: Statements and query results
//! - [`codec`]: Request body encoding and response decoding
//! - [`config`]: Dispatcher tuning and connection settings
//! - [`transport`]: HTTP transport and executor
//! - [`package`]: Submitted statements and their completions
//! - [`batch`]: Insert group accumulator
//! - [`dispatcher`]: The coalescing loop
//! - [`params`]: Named parameter binding
//! - [`api`]: Async client (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for tdlink operations.
///
/// A single error enum covers transport, server, decoding, and lifecycle
/// failures. Errors are `Clone` so one failed request can be reported to
/// every statement that shared it.
pub mod error;

/// Statements and query results.
pub mod types;

/// Request body encoding and response decoding.
///
/// Merges insert clauses behind one `INSERT INTO` header and classifies
/// server replies into results or errors.
pub mod codec;

/// Dispatcher tuning and connection settings.
pub mod config;

/// HTTP transport and the executor that drives it.
pub mod transport;

/// Submitted statements and their one-shot completions.
pub mod package;

/// Insert group accumulator and flush triggers.
pub mod batch;

/// The coalescing dispatcher.
///
/// One background task routes submitted statements: insertions join the
/// open group, everything else is sent on its own. Groups flush on time
/// (4 ms after their first member arrived) or on size (payload limit).
pub mod dispatcher;

/// Named parameter binding for SQL text.
pub mod params;

/// Async client API.
///
/// The main entry point is [`TaosClient`](api::TaosClient).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::TaosClient;
pub use config::{ConnectionConfig, DispatcherConfig};
pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherStats};
pub use error::{Error, Result};
pub use package::Completion;
pub use params::{Param, ParamValue};
pub use transport::{Executor, RawResponse, RestTransport, Transport};

pub use types::{ColumnMeta, InsertStatement, QueryResult, Statement, StatementKind};
