//! # Coalescing Dispatcher
//!
//! This module implements the write path's batching strategy. Callers submit
//! statements from any task; one background loop routes them and decides
//! when to send. Insertions that arrive close together are merged into a
//! single request.
//!
//! ## Why Coalesce?
//!
//! Every request pays a full HTTP round trip. A burst of single-row inserts
//! becomes one multi-row insert:
//!
//! ```text
//! Without coalescing:              With coalescing:
//! ┌──────────────────────────┐     ┌──────────────────────────────────┐
//! │ INSERT INTO d1 ... → RTT │     │ INSERT INTO d1 ... d2 ... d3 ... │
//! │ INSERT INTO d2 ... → RTT │     │ 1 round trip                     │
//! │ INSERT INTO d3 ... → RTT │     └──────────────────────────────────┘
//! └──────────────────────────┘
//! ```
//!
//! ## Routing
//!
//! ```text
//!  submit() ──▶ queue ──▶ dispatcher loop ─┬─ Other ────▶ own task (one request each)
//!                                          │
//!                                          └─ Insertion ─▶ BatchGroup ──flush──▶ insert lane
//!                                                                               (one at a time, FIFO)
//! ```
//!
//! An insert group flushes when its first member has waited the flush
//! interval (4 ms by default) or when its size times the safety margin
//! crosses the payload limit. A member that would push a non-empty group
//! over the limit flushes the group first and starts the next one.
//!
//! ## Failure Semantics
//!
//! A merged request succeeds or fails as a whole: every member receives the
//! same result, or an equal error. Statements whose individual outcome
//! matters should be submitted as [`Statement::Other`].
//!
//! ## Shutdown
//!
//! [`Dispatcher::stop`] resolves queued, not yet dispatched statements with
//! `Error::Shutdown`, flushes the partial insert group, and waits for every
//! request in flight. Submissions after that resolve with `Error::Shutdown`
//! immediately. No completion is ever left pending.
//!
//! ## Invariants
//!
//! - Every completion is resolved exactly once
//! - Other statements are never merged with anything
//! - A merged request body never exceeds the payload limit
//! - Insert groups reach the server in the order they were flushed

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::batch::{BatchGroup, FlushReason};
use crate::codec::encode_group;
use crate::config::DispatcherConfig;
use crate::error::{Error, Result};
use crate::package::{fan_out, CommandPackage, Completion};
use crate::transport::Executor;
use crate::types::{Statement, StatementKind};

/// How long the loop sleeps when no insert group is open.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    requests_sent: AtomicU64,
    failed_requests: AtomicU64,
    insert_groups: AtomicU64,
    statements_coalesced: AtomicU64,
}

/// Point-in-time view of dispatcher activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherStats {
    /// Statements passed to `submit`.
    pub submitted: u64,
    /// Statements refused without being queued (overload or shutdown).
    pub rejected: u64,
    /// Requests issued to the transport.
    pub requests_sent: u64,
    /// Requests that ended in an error.
    pub failed_requests: u64,
    /// Insert groups flushed.
    pub insert_groups: u64,
    /// Insertions sent as part of a flushed group.
    pub statements_coalesced: u64,
    /// Statements queued and not yet picked up by the loop.
    pub queued: usize,
}

/// State shared between handles and the loop.
#[derive(Debug)]
struct Shared {
    counters: Counters,
    queued: AtomicUsize,
    max_queued: Option<usize>,
}

impl Shared {
    fn stats(&self) -> DispatcherStats {
        let c = &self.counters;
        DispatcherStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            requests_sent: c.requests_sent.load(Ordering::Relaxed),
            failed_requests: c.failed_requests.load(Ordering::Relaxed),
            insert_groups: c.insert_groups.load(Ordering::Relaxed),
            statements_coalesced: c.statements_coalesced.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Acquire),
        }
    }
}

// =============================================================================
// Dispatcher Handle
// =============================================================================

/// Cloneable submission handle.
///
/// Submitting never blocks and never waits for the loop.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<CommandPackage>,
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// Queues a statement and returns its completion.
    ///
    /// If the dispatcher is stopped, or the queue limit is reached, the
    /// completion is already resolved with `Error::Shutdown` or
    /// `Error::Overloaded`.
    pub fn submit(&self, statement: Statement) -> Completion {
        let (mut package, completion) = CommandPackage::new(statement);
        let counters = &self.shared.counters;
        counters.submitted.fetch_add(1, Ordering::Relaxed);

        let depth = self.shared.queued.fetch_add(1, Ordering::AcqRel);
        if let Some(limit) = self.shared.max_queued {
            if depth >= limit {
                self.shared.queued.fetch_sub(1, Ordering::AcqRel);
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                package.resolve(Err(Error::Overloaded { limit }));
                return completion;
            }
        }

        if let Err(mpsc::error::SendError(mut package)) = self.tx.send(package) {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            package.resolve(Err(Error::Shutdown));
        }
        completion
    }

    /// Current counters.
    pub fn stats(&self) -> DispatcherStats {
        self.shared.stats()
    }

    /// True once the loop has stopped accepting statements.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Owner of the background loop.
///
/// Dropping the `Dispatcher` without calling [`stop`](Self::stop) signals
/// the loop to shut down as well, but does not wait for it.
pub struct Dispatcher {
    handle: DispatcherHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Starts the loop on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if `config` is invalid
    /// - `Error::Config` if called outside a tokio runtime
    pub fn start(executor: Executor, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Config("dispatcher must be started inside a tokio runtime".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            counters: Counters::default(),
            queued: AtomicUsize::new(0),
            max_queued: config.max_queued,
        });

        let (lane_tx, lane_rx) = mpsc::unbounded_channel();
        let lane_task = runtime.spawn(run_insert_lane(lane_rx, executor.clone(), Arc::clone(&shared)));

        let dispatch_loop = DispatchLoop {
            rx,
            shutdown: shutdown_rx,
            config,
            executor,
            shared: Arc::clone(&shared),
            group: BatchGroup::new(),
            lane_tx,
            lane_task,
            singles: JoinSet::new(),
        };
        let task = runtime.spawn(dispatch_loop.run());

        Ok(Self {
            handle: DispatcherHandle { tx, shared },
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Returns a new submission handle.
    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Queues a statement. See [`DispatcherHandle::submit`].
    pub fn submit(&self, statement: Statement) -> Completion {
        self.handle.submit(statement)
    }

    /// Current counters.
    pub fn stats(&self) -> DispatcherStats {
        self.handle.stats()
    }

    /// Stops the loop and waits until every submitted statement is resolved.
    ///
    /// # Errors
    ///
    /// `Error::Internal` if the loop task panicked.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| Error::Internal(format!("dispatcher task failed: {}", e))),
            None => Ok(()),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

// =============================================================================
// Dispatcher Loop
// =============================================================================

/// State owned by the background loop. Nothing here is shared, so the
/// batch group needs no synchronization.
struct DispatchLoop {
    rx: mpsc::UnboundedReceiver<CommandPackage>,
    shutdown: oneshot::Receiver<()>,
    config: DispatcherConfig,
    executor: Executor,
    shared: Arc<Shared>,
    group: BatchGroup,
    lane_tx: mpsc::UnboundedSender<Vec<CommandPackage>>,
    lane_task: JoinHandle<()>,
    singles: JoinSet<()>,
}

impl DispatchLoop {
    async fn run(mut self) {
        debug!(
            "[tdlink] dispatcher: started (flush_interval={:?}, max_payload={})",
            self.config.flush_interval, self.config.max_payload_bytes
        );

        loop {
            let deadline = self
                .group
                .deadline(self.config.flush_interval)
                .unwrap_or_else(|| Instant::now() + IDLE_WAIT);

            tokio::select! {
                biased;

                // Either stop() or the Dispatcher was dropped.
                _ = &mut self.shutdown => break,

                received = self.rx.recv() => match received {
                    Some(package) => self.dispatch(package),
                    None => break,
                },

                _ = tokio::time::sleep_until(deadline), if !self.group.is_empty() => {
                    self.flush_group(FlushReason::Time);
                }

                Some(joined) = self.singles.join_next(), if !self.singles.is_empty() => {
                    if let Err(e) = joined {
                        error!("[tdlink] dispatcher: statement task failed: {}", e);
                    }
                }
            }
        }

        self.drain().await;
    }

    /// Routes one dequeued package, then checks the open group's triggers.
    ///
    /// The triggers are checked after every package, whatever its kind, so
    /// a steady stream of Other statements cannot hold back an overdue group.
    fn dispatch(&mut self, package: CommandPackage) {
        self.shared.queued.fetch_sub(1, Ordering::AcqRel);

        match package.kind() {
            StatementKind::Other => self.spawn_single(package),
            StatementKind::Insertion => {
                if self.group.would_overflow(package.encoded_len(), &self.config) {
                    self.flush_group(FlushReason::Overflow);
                }
                self.group.push(package);
            }
        }

        if let Some(reason) = self.group.flush_reason(Instant::now(), &self.config) {
            self.flush_group(reason);
        }
    }

    /// Sends an Other statement on its own task.
    ///
    /// The outer task keeps the loop from waiting on the request. The request
    /// itself still runs in `flush`'s inner task, which is what resolves the
    /// package with `Error::Internal` if the transport panics.
    fn spawn_single(&mut self, package: CommandPackage) {
        let executor = self.executor.clone();
        let shared = Arc::clone(&self.shared);
        self.singles.spawn(async move {
            let mut members = [package];
            flush(&executor, &shared, &mut members).await;
        });
    }

    /// Hands the current insert group to the insert lane.
    fn flush_group(&mut self, reason: FlushReason) {
        if self.group.is_empty() {
            return;
        }
        let bytes = self.group.bytes();
        let members = self.group.take();
        debug!(
            "[tdlink] flush: insert group of {} ({} bytes, reason={:?})",
            members.len(),
            bytes,
            reason
        );

        let counters = &self.shared.counters;
        counters.insert_groups.fetch_add(1, Ordering::Relaxed);
        counters
            .statements_coalesced
            .fetch_add(members.len() as u64, Ordering::Relaxed);

        if let Err(mpsc::error::SendError(mut members)) = self.lane_tx.send(members) {
            error!("[tdlink] dispatcher: insert lane is gone, failing {} statements", members.len());
            fan_out(
                &mut members,
                Err(Error::Internal("insert lane stopped".to_string())),
            );
        }
    }

    /// Shutdown path: reject what is still queued, flush what is grouped,
    /// and wait for everything in flight.
    async fn drain(mut self) {
        self.rx.close();
        let mut rejected = 0u64;
        while let Ok(mut package) = self.rx.try_recv() {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
            package.resolve(Err(Error::Shutdown));
            rejected += 1;
        }
        if rejected > 0 {
            warn!("[tdlink] dispatcher: {} queued statements rejected by shutdown", rejected);
            self.shared
                .counters
                .rejected
                .fetch_add(rejected, Ordering::Relaxed);
        }

        self.flush_group(FlushReason::Shutdown);

        let DispatchLoop {
            lane_tx,
            lane_task,
            mut singles,
            ..
        } = self;

        drop(lane_tx);
        if let Err(e) = lane_task.await {
            error!("[tdlink] dispatcher: insert lane failed: {}", e);
        }
        while let Some(joined) = singles.join_next().await {
            if let Err(e) = joined {
                error!("[tdlink] dispatcher: statement task failed: {}", e);
            }
        }

        debug!("[tdlink] dispatcher: stopped");
    }
}

// =============================================================================
// Flush Execution
// =============================================================================

/// Executes insert groups one after another, in flush order.
async fn run_insert_lane(
    mut rx: mpsc::UnboundedReceiver<Vec<CommandPackage>>,
    executor: Executor,
    shared: Arc<Shared>,
) {
    while let Some(mut members) = rx.recv().await {
        flush(&executor, &shared, &mut members).await;
    }
}

/// Encodes, executes, and fans out one group.
///
/// The request runs on its own task so that a panic inside the transport
/// resolves the group with `Error::Internal` instead of killing the caller.
async fn flush(executor: &Executor, shared: &Shared, members: &mut [CommandPackage]) {
    let body = match encode_group(members.iter().map(CommandPackage::statement)) {
        Ok(body) => body,
        Err(e) => {
            error!("[tdlink] flush: could not encode group of {}: {}", members.len(), e);
            fan_out(members, Err(e));
            return;
        }
    };

    shared.counters.requests_sent.fetch_add(1, Ordering::Relaxed);
    let request = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.execute_body(body).await })
    };
    let outcome = match request.await {
        Ok(outcome) => outcome,
        Err(e) => Err(Error::Internal(format!("request task failed: {}", e))),
    };

    if let Err(e) = &outcome {
        shared.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
        warn!("[tdlink] flush: request for {} statements failed: {}", members.len(), e);
    }
    fan_out(members, outcome);
}

// =============================================================================
// Tests
// =============================================================================
