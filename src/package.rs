//! # Command Packages and Completion Handles
//!
//! Every submitted statement travels through the dispatcher as a
//! [`CommandPackage`]. The caller keeps the other half, a [`Completion`],
//! and awaits it:
//!
//! ```text
//!   caller                                dispatcher
//!   ──────                                ──────────
//!   Completion  ◀──── oneshot ────  Responder (inside CommandPackage)
//!      .await                            .resolve(outcome)   exactly once
//! ```
//!
//! ## Rust Concepts
//!
//! - **tokio::sync::oneshot**: single-value channel; the receiver is a future
//! - **Option::take**: turns "send at most once" into a runtime-checked
//!   invariant that a second resolve can observe instead of panicking

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use log::warn;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::types::{QueryResult, Statement, StatementKind};

/// What a completion handle resolves to. On success the result is shared by
/// every member of the request that produced it.
pub type Outcome = Result<Arc<QueryResult>>;

// =============================================================================
// Responder
// =============================================================================

/// Sending half of a completion handle.
#[derive(Debug)]
pub struct Responder {
    tx: Option<oneshot::Sender<Outcome>>,
}

impl Responder {
    /// Delivers `outcome` to the waiting caller.
    ///
    /// Returns `false`, and delivers nothing, if this responder was already
    /// resolved. A caller that stopped waiting is not an error; the outcome
    /// is discarded.
    pub fn resolve(&mut self, outcome: Outcome) -> bool {
        match self.tx.take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => {
                warn!("[tdlink] dispatcher: completion resolved twice, second outcome ignored");
                false
            }
        }
    }

    /// True once [`resolve`](Self::resolve) has been called.
    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }
}

// =============================================================================
// Completion
// =============================================================================

/// Future returned to the caller at submission time.
///
/// Resolves to the shared [`QueryResult`] of the request the statement was
/// part of, or to the error that request failed with. If the dispatcher drops
/// the package without resolving it, the completion yields `Error::Dropped`
/// rather than hanging.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Dropped)))
    }
}

// =============================================================================
// Command Package
// =============================================================================

/// One statement in flight, paired with the responder of its completion.
///
/// The statement and its kind are fixed at creation.
#[derive(Debug)]
pub struct CommandPackage {
    statement: Statement,
    created_at: Instant,
    responder: Responder,
}

impl CommandPackage {
    /// Creates a package and the caller's completion for it.
    pub fn new(statement: Statement) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let package = Self {
            statement,
            created_at: Instant::now(),
            responder: Responder { tx: Some(tx) },
        };
        (package, Completion { rx })
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn kind(&self) -> StatementKind {
        self.statement.kind()
    }

    /// Bytes this package adds to a batch.
    pub fn encoded_len(&self) -> usize {
        self.statement.encoded_len()
    }

    /// When the package was created (enqueue time).
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Resolves this package's completion. See [`Responder::resolve`].
    pub fn resolve(&mut self, outcome: Outcome) -> bool {
        self.responder.resolve(outcome)
    }

    pub fn is_resolved(&self) -> bool {
        self.responder.is_resolved()
    }
}

// =============================================================================
// Fan-out
// =============================================================================

/// Resolves every package of a flushed group with the same outcome.
///
/// A success is wrapped in one `Arc` and shared; a failure is cloned per
/// member, so all members see equal errors. Returns how many packages were
/// resolved by this call.
pub fn fan_out(packages: &mut [CommandPackage], outcome: Result<QueryResult>) -> usize {
    let shared: Outcome = outcome.map(Arc::new);
    packages
        .iter_mut()
        .map(|package| package.resolve(shared.clone()))
        .filter(|resolved| *resolved)
        .count()
}

// =============================================================================
// Tests
// =============================================================================
