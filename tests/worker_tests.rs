//! Queue state-machine behavior: claim ordering, failure buckets, backoff
//! math, cancellation, recovery, and the management operations.

mod support;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use receipt_relay::models::{EventStatus, ReceiptStatus, TaskStatus};
use receipt_relay::notify::RelayStatus;
use receipt_relay::storage::Storage;
use support::{payment_payload, Fixture, Planned};

/// Assert two instants are within a few seconds of each other.
fn close_to(actual: chrono::DateTime<Utc>, expected: chrono::DateTime<Utc>) {
    let delta = (actual - expected).num_seconds().abs();
    assert!(delta <= 5, "expected {expected}, got {actual} ({delta}s apart)");
}

#[tokio::test]
async fn successful_create_persists_receipt_and_finalizes_event() {
    let fx = Fixture::new();
    let (event, task) = fx
        .seed_create_task("pay-1", payment_payload("pay-1", "150.50", "Ann"))
        .await;
    fx.factory.plan(Planned::CreateOk { receipt_id: "r-1", receipt_url: "http://r/1" });

    assert!(fx.worker.tick().await.unwrap());

    let task = fx.storage.task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.error_message, "");

    let event = fx.storage.event_by_id(event.id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Processed);
    assert!(event.processed_at.is_some());
    assert_eq!(event.relay_status, "success");

    // String amount coercion round-trips exactly.
    let receipts = fx.storage.receipts();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].amount, 150.50);
    assert_eq!(receipts[0].provider_receipt_id, "r-1");
    assert_eq!(receipts[0].receipt_url, "http://r/1");
    assert_eq!(receipts[0].status, ReceiptStatus::Created);
    assert_eq!(receipts[0].currency, "RUB");
    assert_eq!(receipts[0].description, "Payment for order pay-1");

    let chat = fx.notifier.chat_calls();
    assert_eq!(chat.len(), 1);
    assert_eq!(chat[0].event_name, "receipt_created");
    assert_eq!(chat[0].receipt_url, "http://r/1");

    // Success clears the profile's stored error.
    let profile = &fx.storage.profiles()[0];
    assert_eq!(profile.last_error, "");
}

#[tokio::test]
async fn eligible_tasks_run_in_creation_order() {
    let fx = Fixture::new();
    fx.seed_create_task("pay-first", payment_payload("pay-first", "1.00", "A")).await;
    fx.seed_create_task("pay-second", payment_payload("pay-second", "2.00", "B")).await;
    fx.factory.plan(Planned::CreateOk { receipt_id: "r-1", receipt_url: "" });
    fx.factory.plan(Planned::CreateOk { receipt_id: "r-2", receipt_url: "" });

    assert!(fx.worker.tick().await.unwrap());
    assert!(fx.worker.tick().await.unwrap());
    assert!(!fx.worker.tick().await.unwrap());

    let calls = fx.factory.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].payment_id, "pay-first");
    assert_eq!(calls[1].payment_id, "pay-second");
}

#[tokio::test]
async fn auth_failure_suspends_task_and_flags_profile() {
    let fx = Fixture::new();
    let (event, task) = fx
        .seed_create_task("pay-1", payment_payload("pay-1", "10.00", "Ann"))
        .await;
    fx.factory.plan(Planned::AuthRequired("credential rejected with status 401"));

    assert!(fx.worker.tick().await.unwrap());

    let task = fx.storage.task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::WaitingAuth);
    assert_eq!(task.attempts, 1);
    assert!(task.error_message.contains("401"));
    close_to(task.next_retry_at, Utc::now() + ChronoDuration::seconds(900));

    let event = fx.storage.event_by_id(event.id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);
    assert!(event.error_message.contains("401"));

    let profile = &fx.storage.profiles()[0];
    assert!(!profile.is_authenticated);
    assert!(profile.last_error.contains("401"));

    let chat = fx.notifier.chat_calls();
    assert_eq!(chat.len(), 1);
    assert_eq!(chat[0].event_name, "auth_required");

    // Suspended, not terminal: nothing is eligible right now...
    assert!(!fx.worker.tick().await.unwrap());
    // ...but the task re-enters the pool once its horizon passes.
    let later = Utc::now() + ChronoDuration::seconds(901);
    let reclaimed = fx.storage.claim_next_task(later).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, task.id);
    assert_eq!(reclaimed.attempts, 2);
}

#[tokio::test]
async fn transient_failures_back_off_linearly() {
    let fx = Fixture::new();
    let (_, task) = fx
        .seed_create_task("pay-1", payment_payload("pay-1", "10.00", "Ann"))
        .await;

    for expected_attempt in 1..=3 {
        fx.factory.plan(Planned::ApiError(500, "backend exploded"));
        assert!(fx.worker.tick().await.unwrap());

        let state = fx.storage.task_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Pending);
        assert_eq!(state.attempts, expected_attempt);
        close_to(
            state.next_retry_at,
            Utc::now() + ChronoDuration::seconds(i64::from(expected_attempt) * 20),
        );
        assert!(state.error_message.contains("backend exploded"));

        // Pull the retry horizon back so the next pass is due immediately.
        fx.worker.requeue(task.id).await.unwrap();
    }
}

#[tokio::test]
async fn exhausted_attempts_go_terminal() {
    let fx = Fixture::new();
    let (event, task) = fx
        .seed_create_task("pay-1", payment_payload("pay-1", "10.00", "Ann"))
        .await;

    // Burn through every attempt but the last.
    let max = task.max_attempts;
    for _ in 1..max {
        fx.factory.plan(Planned::ApiError(502, "still down"));
        assert!(fx.worker.tick().await.unwrap());
        fx.worker.requeue(task.id).await.unwrap();
    }
    fx.factory.plan(Planned::ApiError(502, "still down"));
    assert!(fx.worker.tick().await.unwrap());

    let task = fx.storage.task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, max);

    let event = fx.storage.event_by_id(event.id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);

    // Terminal means terminal: no further claims.
    assert!(!fx.worker.tick().await.unwrap());
}

#[tokio::test]
async fn cancel_marks_latest_receipt_canceled() {
    let fx = Fixture::new();

    // Issue a receipt first so there is something to cancel.
    fx.seed_create_task("pay-9", payment_payload("pay-9", "80.00", "Bo")).await;
    fx.factory.plan(Planned::CreateOk { receipt_id: "r-9", receipt_url: "http://r/9" });
    assert!(fx.worker.tick().await.unwrap());

    let (_, cancel_task) = fx.seed_cancel_task("pay-9", Some("r-9")).await;
    fx.factory.plan(Planned::CancelOk);
    assert!(fx.worker.tick().await.unwrap());

    let cancel_task = fx.storage.task_by_id(cancel_task.id).await.unwrap().unwrap();
    assert_eq!(cancel_task.status, TaskStatus::Success);

    let calls = fx.factory.calls();
    assert_eq!(calls.last().unwrap().operation, "cancel");
    assert_eq!(calls.last().unwrap().receipt_id, "r-9");

    let receipt = fx.storage.latest_receipt(fx.store_id, "pay-9").await.unwrap().unwrap();
    assert_eq!(receipt.status, ReceiptStatus::Canceled);
    assert!(receipt.canceled_at.is_some());

    let chat = fx.notifier.chat_calls();
    assert_eq!(chat.last().unwrap().event_name, "receipt_canceled");
}

#[tokio::test]
async fn cancel_without_receipt_uuid_is_a_terminal_validation_failure() {
    let fx = Fixture::new();
    let (_, task) = fx.seed_cancel_task("pay-1", None).await;

    assert!(fx.worker.tick().await.unwrap());

    let task = fx.storage.task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 1);
    assert!(task.error_message.contains("receipt_uuid"));

    // The provider was never called.
    assert!(fx.factory.calls().is_empty());
}

#[tokio::test]
async fn unresolvable_references_fail_immediately() {
    let fx = Fixture::new();
    // Task pointing at a store id that does not exist.
    let task = fx
        .storage
        .enqueue_task(receipt_relay::models::NewReceiptTask {
            store_id: 9999,
            event_id: 9999,
            payment_id: "pay-x".to_string(),
            kind: receipt_relay::models::TaskKind::CreateReceipt,
            payload: json!({}),
            max_attempts: None,
        })
        .await
        .unwrap();

    assert!(fx.worker.tick().await.unwrap());

    let task = fx.storage.task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.contains("not found"));
    assert!(fx.factory.calls().is_empty());
}

#[tokio::test]
async fn store_without_profile_is_an_integrity_failure() {
    let fx = Fixture::new();
    let mut bare_store = receipt_relay::models::StoreRecord::new("no-profile");
    bare_store.tax_profile_id = None;
    let store_id = fx.storage.seed_store(bare_store);

    let event = fx
        .storage
        .insert_event(receipt_relay::models::NewPaymentEvent {
            store_id,
            event_type: "payment.succeeded".to_string(),
            payment_id: "pay-np".to_string(),
            payload: json!({}),
        })
        .await
        .unwrap();
    let task = fx
        .storage
        .enqueue_task(receipt_relay::models::NewReceiptTask {
            store_id,
            event_id: event.id,
            payment_id: "pay-np".to_string(),
            kind: receipt_relay::models::TaskKind::CreateReceipt,
            payload: json!({}),
            max_attempts: None,
        })
        .await
        .unwrap();

    assert!(fx.worker.tick().await.unwrap());
    let task = fx.storage.task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
}

#[tokio::test]
async fn requeue_revives_a_suspended_task() {
    let fx = Fixture::new();
    let (_, task) = fx
        .seed_create_task("pay-1", payment_payload("pay-1", "10.00", "Ann"))
        .await;
    fx.factory.plan(Planned::AuthRequired("expired"));
    assert!(fx.worker.tick().await.unwrap());

    let requeued = fx.worker.requeue(task.id).await.unwrap().unwrap();
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert_eq!(requeued.error_message, "");

    fx.factory.plan(Planned::CreateOk { receipt_id: "r-1", receipt_url: "" });
    assert!(fx.worker.tick().await.unwrap());
    let task = fx.storage.task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Success);
}

#[tokio::test]
async fn requeue_of_unknown_task_is_none() {
    let fx = Fixture::new();
    assert!(fx.worker.requeue(424242).await.unwrap().is_none());
}

#[tokio::test]
async fn backing_off_task_does_not_block_later_eligible_work() {
    let fx = Fixture::new();
    let (_, first) = fx
        .seed_create_task("pay-early", payment_payload("pay-early", "1.00", "A"))
        .await;
    fx.factory.plan(Planned::ApiError(500, "down"));
    assert!(fx.worker.tick().await.unwrap());

    // First task is now backing off; a later task runs ahead of it.
    fx.seed_create_task("pay-late", payment_payload("pay-late", "2.00", "B")).await;
    fx.factory.plan(Planned::CreateOk { receipt_id: "r-2", receipt_url: "" });
    assert!(fx.worker.tick().await.unwrap());

    let calls = fx.factory.calls();
    assert_eq!(calls[1].payment_id, "pay-late");
    let first = fx.storage.task_by_id(first.id).await.unwrap().unwrap();
    assert_eq!(first.status, TaskStatus::Pending);
}

#[tokio::test]
async fn relay_outcome_is_recorded_on_the_event() {
    let fx = Fixture::new();
    fx.notifier.set_relay_result(RelayStatus::PartialError);
    let (event, _) = fx
        .seed_create_task("pay-1", payment_payload("pay-1", "10.00", "Ann"))
        .await;
    fx.factory.plan(Planned::CreateOk { receipt_id: "r-1", receipt_url: "http://r/1" });

    assert!(fx.worker.tick().await.unwrap());

    let event = fx.storage.event_by_id(event.id).await.unwrap().unwrap();
    assert_eq!(event.relay_status, "partial_error");
}

#[tokio::test]
async fn queue_counts_reflect_task_states() {
    let fx = Fixture::new();
    fx.seed_create_task("pay-1", payment_payload("pay-1", "1.00", "A")).await;
    fx.seed_create_task("pay-2", payment_payload("pay-2", "2.00", "B")).await;
    fx.seed_create_task("pay-3", payment_payload("pay-3", "3.00", "C")).await;

    fx.factory.plan(Planned::CreateOk { receipt_id: "r-1", receipt_url: "" });
    assert!(fx.worker.tick().await.unwrap());
    fx.factory.plan(Planned::AuthRequired("expired"));
    assert!(fx.worker.tick().await.unwrap());

    let counts = fx.worker.queue_counts().await.unwrap();
    assert_eq!(counts.success, 1);
    assert_eq!(counts.waiting_auth, 1);
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.processing, 0);
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.depth(), 2);
}

#[tokio::test]
async fn every_transition_leaves_an_audit_trail() {
    let fx = Fixture::new();
    let (_, task) = fx
        .seed_create_task("pay-1", payment_payload("pay-1", "10.00", "Ann"))
        .await;
    fx.factory.plan(Planned::ApiError(500, "down"));
    assert!(fx.worker.tick().await.unwrap());
    fx.worker.requeue(task.id).await.unwrap();
    fx.factory.plan(Planned::CreateOk { receipt_id: "r-1", receipt_url: "" });
    assert!(fx.worker.tick().await.unwrap());

    let events: Vec<String> =
        fx.storage.audit_records().iter().map(|r| r.event.clone()).collect();
    assert!(events.contains(&"task_claimed".to_string()));
    assert!(events.contains(&"task_retry_scheduled".to_string()));
    assert!(events.contains(&"task_requeued".to_string()));
    assert!(events.contains(&"task_succeeded".to_string()));
}

#[tokio::test]
async fn attempts_never_exceed_ceiling_once_failed() {
    let fx = Fixture::new();
    let (_, task) = fx
        .seed_create_task("pay-1", payment_payload("pay-1", "10.00", "Ann"))
        .await;

    let max = task.max_attempts;
    for _ in 0..max {
        fx.factory.plan(Planned::Transport("connect timeout"));
        fx.worker.tick().await.unwrap();
        fx.worker.requeue(task.id).await.unwrap();
    }
    // Requeued after going terminal: the worker honors the manual reset and
    // runs it once more, but attempts keep climbing monotonically.
    let state = fx.storage.task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(state.status, TaskStatus::Pending);
    assert_eq!(state.attempts, max);
}
