//! Shutdown and Back-pressure Tests
//!
//! Tests that no completion is left pending:
//! - Queued, undispatched statements resolve with `Error::Shutdown`
//! - The partial insert group is flushed, not dropped
//! - Requests in flight finish before `stop` returns
//! - Submissions after stop and beyond the queue limit resolve immediately

mod common;

use std::time::Duration;

use tdlink::{DispatcherConfig, Error, Statement};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn stop_rejects_queued_statements() {
    let transport = common::ScriptedTransport::new();
    let dispatcher = common::start(transport.clone(), DispatcherConfig::default());

    // Nothing has yielded yet, so the loop has not dequeued any of these.
    let queued: Vec<_> = (0..3)
        .map(|i| dispatcher.submit(common::insert(format!("d{} VALUES (now, 1)", i))))
        .collect();
    let stats = dispatcher.stats();
    assert_eq!(stats.queued, 3);

    dispatcher.stop().await.unwrap();

    for completion in queued {
        assert_eq!(completion.await.unwrap_err(), Error::Shutdown);
    }
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_flushes_partial_group() {
    let transport = common::ScriptedTransport::new();
    let dispatcher = common::start(transport.clone(), DispatcherConfig::default());
    let start = Instant::now();

    let grouped = dispatcher.submit(common::insert("d1 VALUES (now, 1)"));
    tokio::time::sleep(Duration::from_millis(1)).await;
    let queued = dispatcher.submit(common::insert("d2 VALUES (now, 2)"));

    dispatcher.stop().await.unwrap();

    // d1 was in the open group and is sent early; d2 never left the queue.
    assert_eq!(grouped.await.unwrap().affected_rows(), 1);
    assert_eq!(queued.await.unwrap_err(), Error::Shutdown);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "INSERT INTO d1 VALUES (now, 1);");
    assert!(sent[0].at.duration_since(start) < Duration::from_millis(4));
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_requests_in_flight() {
    let transport = common::ScriptedTransport::with_delay(Duration::from_millis(50));
    let dispatcher = common::start(transport.clone(), DispatcherConfig::default());
    let start = Instant::now();

    let slow = dispatcher.submit(Statement::other("SELECT * FROM meters"));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(transport.request_count(), 1);

    dispatcher.stop().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(slow.await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn submit_after_stop_is_rejected() {
    let transport = common::ScriptedTransport::new();
    let dispatcher = common::start(transport.clone(), DispatcherConfig::default());
    let handle = dispatcher.handle();

    dispatcher.stop().await.unwrap();
    assert!(handle.is_closed());

    let late = handle.submit(Statement::other("SELECT 1"));
    assert_eq!(late.await.unwrap_err(), Error::Shutdown);
    assert_eq!(handle.stats().rejected, 1);
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn queue_limit_sheds_load() {
    let transport = common::ScriptedTransport::new();
    let config = DispatcherConfig {
        max_queued: Some(2),
        ..DispatcherConfig::default()
    };
    let dispatcher = common::start(transport.clone(), config);

    let a = dispatcher.submit(Statement::other("SELECT 1"));
    let b = dispatcher.submit(Statement::other("SELECT 2"));
    let c = dispatcher.submit(Statement::other("SELECT 3"));

    assert_eq!(c.await.unwrap_err(), Error::Overloaded { limit: 2 });
    a.await.unwrap();
    b.await.unwrap();

    // Once drained, the queue accepts again.
    dispatcher
        .submit(Statement::other("SELECT 4"))
        .await
        .unwrap();

    let stats = dispatcher.stats();
    assert_eq!(stats.submitted, 4);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.requests_sent, 3);

    dispatcher.stop().await.unwrap();
}
