//! # Async Client API
//!
//! [`TaosClient`] is the entry point most callers want. It owns a coalescing
//! [`Dispatcher`] and exposes statement-level operations on top of it:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Async Tasks                          │
//! │   insert() ─┐        query() ─┐       execute() ─┐       │
//! └─────────────┼─────────────────┼──────────────────┼───────┘
//!               ▼                 ▼                  ▼
//!         ┌────────────────────────────────────────────────┐
//!         │            Dispatcher (one loop)               │
//!         │   insert group ──▶ 1 request   other ──▶ 1 each│
//!         └───────────────────────┬────────────────────────┘
//!                                 ▼
//!                         RestTransport (reqwest)
//! ```
//!
//! ## Rust Concepts
//!
//! - **Clone + Arc**: every clone of the client submits to the same dispatcher
//! - **tokio::sync::Mutex**: guards the one-time hand-off of the dispatcher to
//!   `shutdown`, which must be awaited while the lock is held

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::config::{ConnectionConfig, DispatcherConfig};
use crate::dispatcher::{Dispatcher, DispatcherHandle, DispatcherStats};
use crate::error::{Error, Result};
use crate::package::Completion;
use crate::params::{bind, Param};
use crate::transport::{Executor, RestTransport, Transport};
use crate::types::{InsertStatement, QueryResult, Statement};

// =============================================================================
// TaosClient
// =============================================================================

/// Async client for the REST endpoint with coalesced inserts.
///
/// # Thread Safety
///
/// `TaosClient` is `Clone`, `Send`, and `Sync`. All clones share one
/// dispatcher.
///
/// # Example
///
/// ```rust,no_run
/// use tdlink::{ConnectionConfig, DispatcherConfig, TaosClient};
///
/// #[tokio::main]
/// async fn main() -> tdlink::Result<()> {
///     let config = ConnectionConfig::new("localhost").with_database("power");
///     let client = TaosClient::connect(&config, DispatcherConfig::default())?;
///
///     // Concurrent inserts share requests.
///     let a = client.submit_insert("d1 VALUES (now, 1.0)")?;
///     let b = client.submit_insert("d2 VALUES (now, 2.0)")?;
///     a.await?;
///     b.await?;
///
///     let version = client.server_version().await?;
///     println!("server {}", version);
///
///     client.shutdown().await
/// }
/// ```
#[derive(Clone)]
pub struct TaosClient {
    handle: DispatcherHandle,
    dispatcher: Arc<Mutex<Option<Dispatcher>>>,
    transport: Arc<dyn Transport>,
}

impl TaosClient {
    /// Connects over REST and starts the dispatcher.
    ///
    /// No request is made until the first statement is submitted.
    pub fn connect(connection: &ConnectionConfig, config: DispatcherConfig) -> Result<Self> {
        let transport = RestTransport::new(connection)?;
        Self::with_transport(Arc::new(transport), config)
    }

    /// Starts a client over any transport.
    ///
    /// # Use Case
    ///
    /// Dependency injection: tests pass a scripted transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: DispatcherConfig) -> Result<Self> {
        let dispatcher = Dispatcher::start(Executor::new(Arc::clone(&transport)), config)?;
        Ok(Self {
            handle: dispatcher.handle(),
            dispatcher: Arc::new(Mutex::new(Some(dispatcher))),
            transport,
        })
    }

    /// Submits a statement without waiting for it.
    pub fn submit(&self, statement: Statement) -> Completion {
        self.handle.submit(statement)
    }

    /// Submits an insertion clause (everything after `INSERT INTO `) without
    /// waiting for it.
    ///
    /// # Errors
    ///
    /// `Error::MalformedInsert` if the clause cannot be merged.
    pub fn submit_insert(&self, clause: impl Into<String>) -> Result<Completion> {
        Ok(self.submit(Statement::insert(clause)?))
    }

    /// Executes a statement and waits for its result.
    pub async fn execute(&self, statement: Statement) -> Result<Arc<QueryResult>> {
        self.submit(statement).await
    }

    /// Inserts one row, possibly merged with concurrent inserts.
    ///
    /// The returned result describes the whole merged request.
    pub async fn insert(&self, clause: impl Into<String>) -> Result<Arc<QueryResult>> {
        self.submit_insert(clause)?.await
    }

    /// Inserts one row given as a full `INSERT INTO ...` statement.
    pub async fn insert_sql(&self, sql: &str) -> Result<Arc<QueryResult>> {
        let insert = InsertStatement::parse(sql)?;
        self.execute(insert.into()).await
    }

    /// Runs a statement on its own request.
    pub async fn query(&self, sql: impl Into<String>) -> Result<Arc<QueryResult>> {
        self.execute(Statement::other(sql)).await
    }

    /// Binds named parameters, then runs the statement on its own request.
    pub async fn query_with_params(&self, sql: &str, params: &[Param]) -> Result<Arc<QueryResult>> {
        self.query(bind(sql, params)).await
    }

    /// Server version string.
    pub async fn server_version(&self) -> Result<String> {
        let result = self.query("SELECT SERVER_VERSION()").await?;
        scalar_string(&result)
    }

    /// Client library version as reported by the server.
    pub async fn client_version(&self) -> Result<String> {
        let result = self.query("SELECT CLIENT_VERSION()").await?;
        scalar_string(&result)
    }

    /// Switches the default database for unqualified table names.
    ///
    /// Applies to every request sent from now on, including statements that
    /// were already submitted but not yet flushed. Pass `None` or an empty
    /// name to clear it.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the transport has no default database to change.
    pub fn use_database(&self, database: Option<&str>) -> Result<()> {
        self.transport.set_database(database)
    }

    /// Dispatcher counters.
    pub fn stats(&self) -> DispatcherStats {
        self.handle.stats()
    }

    /// Stops the dispatcher and waits for every submitted statement to resolve.
    ///
    /// Later calls on any clone fail with `Error::Shutdown`. Calling
    /// `shutdown` more than once is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let mut guard = self.dispatcher.lock().await;
        match guard.take() {
            Some(dispatcher) => dispatcher.stop().await,
            None => Ok(()),
        }
    }
}

fn scalar_string(result: &QueryResult) -> Result<String> {
    match result.scalar() {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(Error::Decode {
            message: "expected a single value, got an empty result".to_string(),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================
