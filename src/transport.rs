//! # Transport and Executor
//!
//! The dispatcher never talks HTTP directly. It hands an encoded body to an
//! [`Executor`], which sends it through a [`Transport`] and decodes the reply:
//!
//! ```text
//! flushed group ──encode──▶ body ──Transport::send──▶ RawResponse ──decode──▶ QueryResult
//! ```
//!
//! [`RestTransport`] is the production transport. Tests substitute their own
//! `Transport` to script responses and capture request bodies.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, warn};

use crate::codec::{decode_response, encode_group};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::types::{QueryResult, Statement};

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("tdlink/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Transport Trait
// =============================================================================

/// An HTTP response reduced to what decoding needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase.
    pub reason: Option<String>,
    /// Response body as text.
    pub body: String,
}

impl RawResponse {
    /// A 200 response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            reason: Some("OK".to_string()),
            body: body.into(),
        }
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request body and returns the response.
///
/// Implementations must issue exactly one request per call. A returned
/// `Err` means no response was obtained at all; HTTP error statuses are
/// returned as `Ok(RawResponse)` and classified by the codec.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, body: String) -> Result<RawResponse>;

    /// Points later requests at another default database, or at none.
    ///
    /// Transports without a notion of a default database keep the default
    /// implementation, which refuses.
    fn set_database(&self, _database: Option<&str>) -> Result<()> {
        Err(Error::Config(
            "transport does not support changing the database".to_string(),
        ))
    }
}

// =============================================================================
// REST Transport
// =============================================================================

/// [`Transport`] over the server's REST endpoint.
///
/// One `reqwest::Client` is kept for the life of the transport, so TCP
/// connections are pooled across flushes.
pub struct RestTransport {
    http_client: reqwest::Client,
    connection: RwLock<ConnectionConfig>,
}

impl RestTransport {
    /// Builds the HTTP client from connection settings.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the HTTP client cannot be constructed.
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        debug!("[tdlink] http: transport ready for {}", config.endpoint());

        Ok(Self {
            http_client,
            connection: RwLock::new(config.clone()),
        })
    }

    fn connection(&self) -> Result<ConnectionConfig> {
        self.connection
            .read()
            .map(|config| config.clone())
            .map_err(|_| Error::Internal("connection settings lock poisoned".to_string()))
    }

    /// URL requests are currently posted to.
    pub fn endpoint(&self) -> Result<String> {
        Ok(self.connection()?.endpoint())
    }

    /// Builds the request without sending it.
    pub fn build_request(&self, body: String) -> Result<reqwest::Request> {
        let connection = self.connection()?;
        let request = self
            .http_client
            .post(connection.endpoint())
            .basic_auth(&connection.username, Some(&connection.password))
            .header(reqwest::header::ACCEPT, "text/plain")
            .header(reqwest::header::ACCEPT_CHARSET, "utf-8")
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .build()?;
        Ok(request)
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn send(&self, body: String) -> Result<RawResponse> {
        let len = body.len();
        let request = self.build_request(body)?;
        let start = Instant::now();

        let response = match self.http_client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "[tdlink] http: request failed after {}ms: {}",
                    start.elapsed().as_millis(),
                    e
                );
                return Err(e.into());
            }
        };

        let status = response.status();
        let body = response.text().await?;
        debug!(
            "[tdlink] http: status={} request_bytes={} response_bytes={} duration_ms={}",
            status,
            len,
            body.len(),
            start.elapsed().as_millis()
        );

        Ok(RawResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            body,
        })
    }

    fn set_database(&self, database: Option<&str>) -> Result<()> {
        let mut connection = self
            .connection
            .write()
            .map_err(|_| Error::Internal("connection settings lock poisoned".to_string()))?;
        connection.database = database.filter(|db| !db.is_empty()).map(str::to_string);
        debug!("[tdlink] http: endpoint is now {}", connection.endpoint());
        Ok(())
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Combines, sends, and decodes one flushed group.
///
/// The executor knows nothing about completion handles; it returns a single
/// outcome for the whole group.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Encodes the statements as one body and executes it.
    pub async fn execute(&self, statements: &[&Statement]) -> Result<QueryResult> {
        let body = encode_group(statements.iter().copied())?;
        self.execute_body(body).await
    }

    /// Sends an already encoded body.
    pub async fn execute_body(&self, body: String) -> Result<QueryResult> {
        let response = self.transport.send(body).await?;
        let result = decode_response(&response)?;
        debug!(
            "[tdlink] flush: code={} rows={} cols={}",
            result.code,
            result.affected_rows(),
            result.column_meta.as_ref().map_or(0, Vec::len)
        );
        Ok(result)
    }
}

// =============================================================================
// Tests
// =============================================================================
