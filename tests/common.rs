#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tdlink::{
    Dispatcher, DispatcherConfig, Error, Executor, RawResponse, Result, Statement, Transport,
};
use tokio::time::Instant;

pub const OK_BODY: &str = r#"{"code":0,"rows":1}"#;

/// One request seen by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct Sent {
    pub body: String,
    pub at: Instant,
}

/// Mock transport: records every body, answers from a script, then with
/// `OK_BODY` once the script runs out.
#[derive(Default)]
pub struct ScriptedTransport {
    sent: Mutex<Vec<Sent>>,
    script: Mutex<VecDeque<Result<RawResponse>>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every request takes `delay` (virtual time under a paused clock).
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Answers the first requests with `responses`, in order.
    pub fn scripted(responses: Vec<Result<RawResponse>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|s| s.body.clone()).collect()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, body: String) -> Result<RawResponse> {
        self.sent.lock().unwrap().push(Sent {
            body,
            at: Instant::now(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(RawResponse::ok(OK_BODY)))
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn start(transport: Arc<ScriptedTransport>, config: DispatcherConfig) -> Dispatcher {
    init_logging();
    Dispatcher::start(Executor::new(transport), config).expect("start dispatcher")
}

pub fn insert(clause: impl Into<String>) -> Statement {
    Statement::insert(clause).expect("valid insert clause")
}

/// An insertion whose single-statement rendering is exactly `total` bytes.
pub fn insert_of_len(table: &str, total: usize) -> Statement {
    // "INSERT INTO " + table + " VALUES ('" + pad + "')" + ";"
    let fixed = "INSERT INTO ".len() + table.len() + " VALUES ('".len() + "')".len() + 1;
    let pad = "x".repeat(total - fixed);
    let statement = insert(format!("{} VALUES ('{}')", table, pad));
    assert_eq!(statement.encoded_len(), total);
    statement
}

pub fn transport_error() -> Error {
    Error::Transport {
        message: "connection reset by peer".to_string(),
    }
}
