mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use heatloop_lib::broker::job::JobState;
use heatloop_lib::broker::job_broker::RenderJobBroker;
use heatloop_lib::errors::HeatloopError;
use heatloop_lib::perception::types::RenderSize;

const SIZE: RenderSize = RenderSize { width: 64, height: 36 };

#[tokio::test]
async fn second_publish_while_outstanding_is_a_protocol_violation() {
    let broker = RenderJobBroker::new(SIZE);
    let _h = broker.publish(1, common::render_png(SIZE), vec![]).unwrap();
    let err = broker.publish(2, common::render_png(SIZE), vec![]).err().unwrap();
    assert!(matches!(err, HeatloopError::ProtocolViolation(_)));
    assert!(!err.is_turn_recoverable());
    assert_eq!(broker.state(), JobState::Published { seq: 1 });
}

#[tokio::test]
async fn stale_result_is_rejected_and_does_not_wake_the_waiter() {
    let broker = Arc::new(RenderJobBroker::new(SIZE));
    let handle = broker.publish(1, common::render_png(SIZE), vec![]).unwrap();

    let b = broker.clone();
    let waiter = tokio::spawn(async move { b.await_result(handle, Duration::from_millis(300)).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let err = broker.submit_result(7, common::render_png(SIZE)).err().unwrap();
    assert!(matches!(err, HeatloopError::ProtocolViolation(_)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished(), "stale result must not unblock the waiter");

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(HeatloopError::RenderTimeout { seq: 1, .. })));
}

#[tokio::test]
async fn await_without_result_times_out_after_the_bound() {
    let broker = RenderJobBroker::new(SIZE);
    let handle = broker.publish(1, common::render_png(SIZE), vec![]).unwrap();

    let timeout = Duration::from_millis(120);
    let started = Instant::now();
    let result = broker.await_result(handle, timeout).await;
    assert!(started.elapsed() >= timeout);
    match result {
        Err(e @ HeatloopError::RenderTimeout { .. }) => assert!(e.is_turn_recoverable()),
        other => panic!("expected RenderTimeout, got {other:?}"),
    }
    assert_eq!(broker.state(), JobState::TimedOut { seq: 1 });
    assert!(broker.fetch_pending().is_none());

    // The late result for the timed-out job is stale.
    assert!(broker.submit_result(1, common::render_png(SIZE)).is_err());
    // And the next job publishes normally.
    assert!(broker.publish(2, common::render_png(SIZE), vec![]).is_ok());
}

#[tokio::test]
async fn matching_result_resolves_the_waiter() {
    let broker = Arc::new(RenderJobBroker::new(SIZE));
    let handle = broker.publish(1, common::render_png(SIZE), vec![]).unwrap();

    let b = broker.clone();
    let waiter = tokio::spawn(async move { b.await_result(handle, Duration::from_secs(5)).await });

    let job = broker.fetch_pending().unwrap();
    assert_eq!(job.seq, 1);
    assert_eq!((job.render_width, job.render_height), (64, 36));
    let png = common::render_png(SIZE);
    broker.submit_result(job.seq, png.clone()).unwrap();

    let img = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();
    assert_eq!(img.seq, 1);
    assert_eq!(img.png, png);
    assert_eq!(broker.state(), JobState::Resolved { seq: 1 });

    // Duplicate post of the same sequence is stale now.
    assert!(broker.submit_result(1, common::render_png(SIZE)).is_err());
}
