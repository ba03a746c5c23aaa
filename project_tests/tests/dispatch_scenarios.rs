//! End-to-end dispatch scenarios against the in-process fake service.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;

use lib_dispatch::{Completion, ConnectionState, DispatchConfig, DispatchError, JobSpec};
use project_tests::{FakeService, ReplyMode, context, init_test_logging, result_for, test_config, wait_until};

fn channel_first() -> DispatchConfig {
    DispatchConfig {
        cold_start_rest: false,
        ..test_config()
    }
}

#[tokio::test(start_paused = true)]
async fn healthy_service_delivers_exactly_one_result_over_the_channel() {
    init_test_logging();
    let service = FakeService::new();
    service.configure(|k| k.reply = ReplyMode::Duplicate);
    let ctx = context(&service, channel_first());

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let (tx, rx) = tokio::sync::oneshot::channel();
    let completion = Completion::from_fn(move |outcome| {
        seen.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(outcome);
    });
    let payload = json!({"src": "https://cdn.example/data/h1/p1.png", "metadata": {"image_id": "C1"}});
    ctx.submit(JobSpec::new(payload.clone(), completion));

    let done = rx.await.unwrap().unwrap();
    assert_eq!(done.content_id.as_deref(), Some("C1"));
    assert!(!done.from_cache);
    assert_eq!(done.result, result_for(&payload));

    // The duplicate result frame must not reach the caller again.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.sent_jobs().len(), 1);
    assert_eq!(service.opens(), 1);
    assert_eq!(ctx.pending_jobs(), 0);
    assert!(ctx.has_delivered());
    assert_eq!(ctx.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn offline_service_fails_without_opening_a_channel() {
    init_test_logging();
    let service = FakeService::new();
    service.configure(|k| k.healthy = false);
    let ctx = context(&service, channel_first());

    let outcome = ctx.run(json!({"src": "https://cdn.example/data/h1/p1.png"})).await;

    assert_eq!(outcome, Some(Err(DispatchError::Offline)));
    assert_eq!(ctx.open_attempts(), 0);
    assert_eq!(service.opens(), 0);
    assert_eq!(ctx.connection_state(), ConnectionState::Offline);
}

#[tokio::test(start_paused = true)]
async fn offline_service_fails_cold_jobs_before_submitting() {
    let service = FakeService::new();
    service.configure(|k| k.healthy = false);
    let ctx = context(&service, test_config());

    let outcome = ctx.run(json!({"src": "https://cdn.example/data/h1/p1.png"})).await;

    assert_eq!(outcome, Some(Err(DispatchError::Offline)));
    assert_eq!(service.rest_submits(), 0);
    assert_eq!(service.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn channel_loss_fails_every_pending_job_once_and_blocks_sends() {
    init_test_logging();
    let service = FakeService::new();
    service.configure(|k| k.reply = ReplyMode::Silent);
    let ctx = context(&service, channel_first());

    let calls = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for i in 0..3 {
        let (completion, handle) = Completion::channel();
        let counted = Arc::clone(&calls);
        let counting = Completion::from_fn(move |outcome| {
            counted.fetch_add(1, Ordering::SeqCst);
            completion.resolve(outcome);
        });
        ctx.submit(JobSpec::new(json!({"n": i}), counting).with_content_id(format!("C{}", i)));
        handles.push(handle);
    }
    assert!(wait_until(Duration::from_secs(30), || service.sent_jobs().len() == 3).await);
    assert_eq!(ctx.pending_jobs(), 3);

    assert!(service.drop_channel("service restarted"));

    for outcome in join_all(handles.into_iter().map(|h| h.outcome())).await {
        assert_eq!(outcome, Some(Err(DispatchError::ConnectionLost)));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.pending_jobs(), 0);
    assert!(ctx.sends_blocked());
    assert_eq!(ctx.connection_state(), ConnectionState::Idle);

    // Nothing new goes out until the next batch begins.
    let blocked = ctx.run(json!({"n": 3})).await;
    assert_eq!(blocked, Some(Err(DispatchError::SendsBlocked)));
    assert_eq!(service.sent_jobs().len(), 3);

    ctx.begin_batch();
    assert!(!ctx.sends_blocked());
    service.configure(|k| k.reply = ReplyMode::Result);
    let outcome = ctx.run(json!({"n": 4})).await;
    assert!(matches!(outcome, Some(Ok(_))));
    assert_eq!(service.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn cold_start_goes_through_rest_then_switches_to_the_channel() {
    init_test_logging();
    let service = FakeService::new();
    service.configure(|k| k.rest_pending_polls = 2);
    let ctx = context(&service, test_config());

    let first = ctx
        .run(json!({"src": "https://cdn.example/data/h1/p1.png", "metadata": {"image_id": "C1"}}))
        .await;
    let first = first.unwrap().unwrap();
    assert_eq!(first.content_id.as_deref(), Some("C1"));
    assert_eq!(service.rest_submits(), 1);
    assert_eq!(service.rest_polls(), 3);
    assert!(ctx.has_delivered());

    // The channel was warmed up in the background while REST was polling.
    assert!(wait_until(Duration::from_secs(5), || ctx.connection_state() == ConnectionState::Connected).await);

    let second = ctx.run(json!({"src": "https://cdn.example/data/h1/p2.png"})).await;
    assert!(matches!(second, Some(Ok(ref r)) if !r.from_cache));
    assert_eq!(service.rest_submits(), 1);
    assert_eq!(service.sent_jobs().len(), 1);
    assert_eq!(service.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrency_ceiling_holds_and_every_job_completes() {
    init_test_logging();
    let service = FakeService::new();
    service.configure(|k| k.rest_pending_polls = 2);
    let ctx = context(
        &service,
        DispatchConfig {
            max_concurrency: 2,
            ..test_config()
        },
    );

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let (completion, handle) = Completion::channel();
            ctx.submit(JobSpec::new(json!({"src": format!("https://cdn.example/data/h/{}.png", i)}), completion));
            handle
        })
        .collect();
    assert_eq!(ctx.running_jobs(), 2);
    assert_eq!(ctx.queued_jobs(), 3);

    let outcomes = join_all(handles.into_iter().map(|h| h.outcome())).await;
    assert_eq!(outcomes.len(), 5);
    for outcome in outcomes {
        assert!(matches!(outcome, Some(Ok(_))), "unexpected outcome {:?}", outcome);
    }
    assert_eq!(ctx.peak_running_jobs(), 2);
    assert!(wait_until(Duration::from_secs(1), || ctx.running_jobs() == 0).await);
    assert_eq!(ctx.queued_jobs(), 0);
    assert_eq!(ctx.pending_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn raising_the_ceiling_starts_queued_jobs() {
    let service = FakeService::new();
    service.configure(|k| k.rest_pending_polls = 5);
    let ctx = context(
        &service,
        DispatchConfig {
            max_concurrency: 1,
            ..test_config()
        },
    );

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let (completion, handle) = Completion::channel();
            ctx.submit(JobSpec::new(json!({"n": i}), completion));
            handle
        })
        .collect();
    assert_eq!(ctx.running_jobs(), 1);

    ctx.set_max_concurrency(0);
    assert_eq!(ctx.running_jobs(), 3);
    assert_eq!(ctx.queued_jobs(), 0);

    for outcome in join_all(handles.into_iter().map(|h| h.outcome())).await {
        assert!(matches!(outcome, Some(Ok(_))));
    }
}
