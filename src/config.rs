//! # Configuration
//!
//! Two independent pieces of configuration:
//!
//! - [`DispatcherConfig`]: flush policy of the coalescing dispatcher
//! - [`ConnectionConfig`]: where and how the REST transport connects
//!
//! Both are plain structs with `Default`, so tests can override single fields
//! with struct update syntax:
//!
//! ```rust
//! use std::time::Duration;
//! use tdlink::DispatcherConfig;
//!
//! let config = DispatcherConfig {
//!     flush_interval: Duration::from_millis(20),
//!     ..DispatcherConfig::default()
//! };
//! assert_eq!(config.max_payload_bytes, 1_048_576);
//! ```

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

// =============================================================================
// Dispatcher Configuration
// =============================================================================

/// Default time an insert group may wait for more members.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 4;

/// Longest flush interval `validate` accepts.
pub const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum request body the server accepts.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// Multiplier applied to the accumulated size before comparing with the
/// payload limit.
pub const DEFAULT_SIZE_MARGIN: f64 = 1.1;

/// Flush policy for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum time between the first member of an insert group arriving and
    /// the group being flushed.
    pub flush_interval: Duration,

    /// Payload limit used by the size trigger.
    pub max_payload_bytes: usize,

    /// Safety factor for the size trigger: a group flushes once
    /// `bytes * size_margin > max_payload_bytes`.
    pub size_margin: f64,

    /// Maximum number of queued, not yet dispatched statements.
    ///
    /// `None` leaves the queue unbounded. With `Some(n)`, a submission that
    /// would exceed `n` fails immediately with `Error::Overloaded`.
    pub max_queued: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            size_margin: DEFAULT_SIZE_MARGIN,
            max_queued: None,
        }
    }
}

impl DispatcherConfig {
    /// Returns true if a group of `bytes` must be flushed on size.
    pub fn exceeds_payload(&self, bytes: usize) -> bool {
        bytes as f64 * self.size_margin > self.max_payload_bytes as f64
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(Error::Config("flush_interval must be positive".to_string()));
        }
        if self.flush_interval > MAX_FLUSH_INTERVAL {
            return Err(Error::Config(format!(
                "flush_interval must be at most {:?}, got {:?}",
                MAX_FLUSH_INTERVAL, self.flush_interval
            )));
        }
        if self.max_payload_bytes == 0 {
            return Err(Error::Config("max_payload_bytes must be positive".to_string()));
        }
        if !(self.size_margin.is_finite() && self.size_margin >= 1.0) {
            return Err(Error::Config(format!(
                "size_margin must be a finite value >= 1.0, got {}",
                self.size_margin
            )));
        }
        if self.max_queued == Some(0) {
            return Err(Error::Config("max_queued must be positive when set".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Connection Configuration
// =============================================================================

/// Default REST port of the server.
pub const DEFAULT_PORT: u16 = 6041;

/// Default request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the REST transport.
///
/// # Example
///
/// ```rust
/// use tdlink::ConnectionConfig;
///
/// let config = ConnectionConfig::parse(
///     "Data Source=tsdb.local;DataBase=power;Username=root;Password=taosdata;TimeZone=UTC",
/// )
/// .unwrap();
/// assert_eq!(config.endpoint(), "http://tsdb.local:6041/rest/sql/power?tz=UTC");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// REST port.
    pub port: u16,
    /// Default database for unqualified table names.
    pub database: Option<String>,
    /// Basic-auth user.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
    /// Time zone the server uses to render timestamps.
    pub timezone: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: None,
            username: "root".to_string(),
            password: "taosdata".to_string(),
            timezone: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

// Password stays out of logs.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timezone", &self.timezone)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ConnectionConfig {
    /// Creates a configuration for `host` with all other values defaulted.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Parses a `key=value;key=value` connection string.
    ///
    /// Keys are case-insensitive. Recognized keys: `Data Source` (or
    /// `Host`/`Server`), `Port`, `DataBase`, `Username` (or `User ID`),
    /// `Password`, `TimeZone`, `Connection Timeout` (seconds).
    ///
    /// # Errors
    ///
    /// `Error::Config` for unknown keys, entries without `=`, bad numbers, or
    /// a missing data source.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut config = Self {
            host: String::new(),
            ..Self::default()
        };

        for entry in connection_string.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("expected key=value, got '{}'", entry)))?;
            let value = value.trim();
            let key: String = key
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase();

            match key.as_str() {
                "datasource" | "host" | "server" => config.host = value.to_string(),
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid port '{}'", value)))?
                }
                "database" => config.database = non_empty(value),
                "username" | "userid" | "user" => config.username = value.to_string(),
                "password" => config.password = value.to_string(),
                "timezone" => config.timezone = non_empty(value),
                "connectiontimeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout '{}'", value)))?;
                    config.timeout = Duration::from_secs(secs);
                }
                _ => return Err(Error::Config(format!("unknown connection string key '{}'", key))),
            }
        }

        if config.host.is_empty() {
            return Err(Error::Config("connection string has no data source".to_string()));
        }
        Ok(config)
    }

    /// URL every request is posted to.
    pub fn endpoint(&self) -> String {
        let mut url = format!("http://{}:{}/rest/sql", self.host, self.port);
        if let Some(database) = &self.database {
            url.push('/');
            url.push_str(database);
        }
        if let Some(tz) = &self.timezone {
            url.push_str("?tz=");
            url.push_str(tz);
        }
        url
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.flush_interval, Duration::from_millis(4));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_size_trigger_threshold() {
        let config = DispatcherConfig::default();
        // 953_251 * 1.1 = 1_048_576.1
        assert!(!config.exceeds_payload(953_250));
        assert!(config.exceeds_payload(953_251));
        assert!(config.exceeds_payload(2_000_000));
    }

    #[test]
    fn test_dispatcher_validation() {
        let bad_margin = DispatcherConfig {
            size_margin: 0.5,
            ..DispatcherConfig::default()
        };
        assert!(bad_margin.validate().is_err());

        let zero_queue = DispatcherConfig {
            max_queued: Some(0),
            ..DispatcherConfig::default()
        };
        assert!(zero_queue.validate().is_err());

        let zero_interval = DispatcherConfig {
            flush_interval: Duration::ZERO,
            ..DispatcherConfig::default()
        };
        assert!(zero_interval.validate().is_err());

        let endless_interval = DispatcherConfig {
            flush_interval: Duration::MAX,
            ..DispatcherConfig::default()
        };
        assert!(matches!(endless_interval.validate(), Err(Error::Config(_))));

        let longest = DispatcherConfig {
            flush_interval: MAX_FLUSH_INTERVAL,
            ..DispatcherConfig::default()
        };
        assert!(longest.validate().is_ok());
    }

    #[test]
    fn test_parse_connection_string() {
        let config = ConnectionConfig::parse(
            "Data Source = db.local; Port=16041; DataBase=power; Username=alice; Password=s3cr=t; Connection Timeout=5",
        )
        .unwrap();
        assert_eq!(config.host, "db.local");
        assert_eq!(config.port, 16041);
        assert_eq!(config.database.as_deref(), Some("power"));
        assert_eq!(config.username, "alice");
        assert_eq!(config.password, "s3cr=t");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.endpoint(), "http://db.local:16041/rest/sql/power");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ConnectionConfig::parse("Port=6041").is_err());
        assert!(ConnectionConfig::parse("Data Source=x;Flavor=mint").is_err());
        assert!(ConnectionConfig::parse("Data Source=x;Port=abc").is_err());
        assert!(ConnectionConfig::parse("Data Source").is_err());
    }

    #[test]
    fn test_endpoint_without_database() {
        let config = ConnectionConfig::new("10.0.0.5");
        assert_eq!(config.endpoint(), "http://10.0.0.5:6041/rest/sql");
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ConnectionConfig::new("h").with_credentials("u", "hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
