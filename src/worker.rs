//! # Receipt Worker
//!
//! The queue's state machine. A single cooperative polling loop claims at
//! most one eligible task per tick, drives it through the fiscal provider,
//! fans the result out to the store's notification sinks, and commits every
//! durable write of the pass atomically.
//!
//! ## Failure buckets
//!
//! Checked in priority order after dispatch:
//!
//! 1. **Authentication required** — task suspends in `waiting_auth` with a
//!    15-minute retry horizon, the credential profile is flipped
//!    unauthenticated, and operators are notified. The attempts ceiling does
//!    not gate this path; it recurs until a human re-authenticates.
//! 2. **Transient failure, attempts remaining** — back to `pending` with
//!    linear backoff, `min(300, attempts * 20)` seconds.
//! 3. **Attempts exhausted** — terminal `failed`.
//!
//! Data-integrity failures (missing store/event/profile, a cancellation
//! without `receipt_uuid`) go terminal immediately; retrying cannot fix
//! missing data.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEntry, AuditLevel, AuditLogger};
use crate::error::Result;
use crate::models::{
    NewReceipt, PaymentEvent, ReceiptTask, StoreRecord, TaskKind, TaxProfile, TaxProvider,
    EventStatus,
};
use crate::notify::NotificationSink;
use crate::provider::{credentials, ProviderError, ProviderFactory, ReceiptRequest};
use crate::storage::{
    EventUpdate, ProfileUpdate, QueueCounts, ReceiptWrite, Storage, TaskDisposition, TaskOutcome,
};
use crate::template::{build_event_context, coerce_amount, render_template};

/// Scheduling and backoff knobs for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Seconds between ticks.
    pub poll_interval: Duration,
    /// How long a `processing` mark may persist before reconciliation.
    pub processing_grace: Duration,
    /// Suspension horizon after an authentication failure.
    pub auth_retry_delay: Duration,
    /// Linear backoff step per accumulated attempt.
    pub backoff_step: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            processing_grace: Duration::from_secs(300),
            auth_retry_delay: Duration::from_secs(900),
            backoff_step: Duration::from_secs(20),
            backoff_cap: Duration::from_secs(300),
        }
    }
}

/// Internal failure classification feeding the bucket decision.
#[derive(Debug)]
enum DispatchFailure {
    /// Credential rejected by the provider; suspend, do not burn attempts.
    Auth(String),
    /// Data-integrity or validation failure; terminal immediately.
    Fatal(String),
    /// Anything else; retry with backoff up to the ceiling.
    Transient(String),
}

impl From<ProviderError> for DispatchFailure {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::AuthRequired(message) => Self::Auth(message),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// What a successful dispatch hands back for the outcome commit.
struct DispatchOutput {
    receipt: Option<ReceiptWrite>,
    relay_status: Option<String>,
}

pub struct ReceiptWorker {
    storage: Arc<dyn Storage>,
    providers: Arc<dyn ProviderFactory>,
    notifier: Arc<dyn NotificationSink>,
    audit: AuditLogger,
    config: WorkerConfig,
}

impl ReceiptWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        providers: Arc<dyn ProviderFactory>,
        notifier: Arc<dyn NotificationSink>,
        config: WorkerConfig,
    ) -> Self {
        let audit = AuditLogger::new(storage.clone());
        Self { storage, providers, notifier, audit, config }
    }

    /// Run the polling loop until the cancellation token fires. Cancellation
    /// takes effect only between ticks; a tick in flight always completes.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "receipt worker starting"
        );

        if let Err(err) = self.recover_stale().await {
            error!(error = %err, "startup reconciliation failed");
        }

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // A single bad tick must never take the loop down.
            if let Err(err) = self.tick().await {
                error!(error = %err, "worker tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!("receipt worker stopped");
    }

    /// Return tasks stuck in `processing` beyond the grace period to the
    /// eligible pool, attempts unchanged.
    pub async fn recover_stale(&self) -> Result<usize> {
        let recovered = self
            .storage
            .recover_stale_processing(Utc::now(), self.config.processing_grace)
            .await?;
        for task_id in &recovered {
            self.audit
                .record(
                    AuditEntry::new(
                        "task_recovered",
                        format!("Task #{task_id} reset from stale processing state"),
                    )
                    .with_level(AuditLevel::Warn)
                    .with_context(serde_json::json!({ "task_id": task_id })),
                )
                .await;
        }
        Ok(recovered.len())
    }

    /// One scheduler pass: claim and process at most one eligible task.
    /// Returns whether a task was processed.
    pub async fn tick(&self) -> Result<bool> {
        if let Err(err) = self.recover_stale().await {
            warn!(error = %err, "stale-task reconciliation failed, continuing");
        }

        let now = Utc::now();
        let Some(task) = self.storage.claim_next_task(now).await? else {
            return Ok(false);
        };

        debug!(
            task_id = task.id,
            payment_id = %task.payment_id,
            attempt = task.attempts,
            "claimed receipt task"
        );
        self.audit
            .record(
                AuditEntry::new(
                    "task_claimed",
                    format!("Task #{} claimed for processing", task.id),
                )
                .with_store(task.store_id)
                .with_context(task_context(&task)),
            )
            .await;

        self.process_claimed(task).await?;
        Ok(true)
    }

    /// Manual requeue: reset a task to `pending`, clear its error, make it
    /// due immediately, regardless of prior state.
    pub async fn requeue(&self, task_id: i64) -> Result<Option<ReceiptTask>> {
        let task = self.storage.requeue_task(task_id, Utc::now()).await?;
        if let Some(task) = &task {
            self.audit
                .record(
                    AuditEntry::new("task_requeued", format!("Task #{} requeued", task.id))
                        .with_store(task.store_id)
                        .with_context(task_context(task)),
                )
                .await;
        }
        Ok(task)
    }

    /// Queue depth and per-status counts for dashboarding.
    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        self.storage.queue_counts().await
    }

    async fn process_claimed(&self, task: ReceiptTask) -> Result<()> {
        let store = self.storage.store_by_id(task.store_id).await?;
        let event = self.storage.event_by_id(task.event_id).await?;
        let profile = match store.as_ref().and_then(|s| s.tax_profile_id) {
            Some(profile_id) => self.storage.profile_by_id(profile_id).await?,
            None => None,
        };

        let (Some(store), Some(event), Some(mut profile)) = (store, event, profile) else {
            return self
                .finish(
                    &task,
                    None,
                    None,
                    FinishState::Fatal("store, event, or credential profile not found".to_string()),
                )
                .await;
        };

        // Consumer sessions need a device identity; generate one for
        // profiles that never recorded it and persist it on success.
        let mut generated_device_id = None;
        if profile.provider == TaxProvider::ConsumerApi && profile.device_id.is_empty() {
            let device_id = credentials::generate_device_id();
            profile.device_id = device_id.clone();
            generated_device_id = Some(device_id);
        }

        let state = match self.dispatch(&task, &store, &profile, &event).await {
            Ok(output) => FinishState::Success { output, generated_device_id },
            Err(DispatchFailure::Auth(message)) => {
                self.notify_chat(
                    store.id,
                    "auth_required",
                    &format!("Provider re-authentication required: {message}"),
                    "",
                )
                .await;
                FinishState::Auth(message)
            }
            Err(DispatchFailure::Fatal(message)) => FinishState::Fatal(message),
            Err(DispatchFailure::Transient(message)) => FinishState::Transient(message),
        };

        self.finish(&task, Some(&event), Some(&profile), state).await
    }

    /// Build and commit the pass outcome, then audit the transition.
    async fn finish(
        &self,
        task: &ReceiptTask,
        event: Option<&PaymentEvent>,
        profile: Option<&TaxProfile>,
        state: FinishState,
    ) -> Result<()> {
        let now = Utc::now();
        let (outcome, audit_entry) = match state {
            FinishState::Success { output, generated_device_id } => {
                let outcome = TaskOutcome {
                    task_id: task.id,
                    disposition: TaskDisposition::Success,
                    error_message: String::new(),
                    event: event.map(|event| EventUpdate {
                        event_id: event.id,
                        status: EventStatus::Processed,
                        error_message: String::new(),
                        processed_at: Some(now),
                        relay_status: output.relay_status,
                    }),
                    receipt: output.receipt,
                    profile: profile.map(|profile| ProfileUpdate {
                        profile_id: profile.id,
                        is_authenticated: None,
                        last_error: Some(String::new()),
                        device_id: generated_device_id,
                    }),
                };
                let entry = AuditEntry::new(
                    "task_succeeded",
                    format!("Task #{} completed ({})", task.id, task.kind),
                )
                .with_store(task.store_id)
                .with_context(task_context(task));
                (outcome, entry)
            }
            FinishState::Auth(message) => {
                let next_retry_at = now + chrono_secs(self.config.auth_retry_delay);
                let outcome = TaskOutcome {
                    task_id: task.id,
                    disposition: TaskDisposition::WaitingAuth { next_retry_at },
                    error_message: message.clone(),
                    event: event.map(|event| failed_event(event, &message)),
                    receipt: None,
                    profile: profile.map(|profile| ProfileUpdate {
                        profile_id: profile.id,
                        is_authenticated: Some(false),
                        last_error: Some(message.clone()),
                        device_id: None,
                    }),
                };
                let entry = AuditEntry::new(
                    "task_waiting_auth",
                    format!("Task #{} suspended until re-authentication: {message}", task.id),
                )
                .with_level(AuditLevel::Warn)
                .with_store(task.store_id)
                .with_context(task_context(task));
                (outcome, entry)
            }
            FinishState::Fatal(message) => {
                let outcome = TaskOutcome {
                    task_id: task.id,
                    disposition: TaskDisposition::Failed,
                    error_message: message.clone(),
                    event: event.map(|event| failed_event(event, &message)),
                    receipt: None,
                    profile: None,
                };
                let entry = AuditEntry::new(
                    "task_failed",
                    format!("Task #{} failed permanently: {message}", task.id),
                )
                .with_level(AuditLevel::Error)
                .with_store(task.store_id)
                .with_context(task_context(task));
                (outcome, entry)
            }
            FinishState::Transient(message) => {
                if task.attempts_exhausted() {
                    let outcome = TaskOutcome {
                        task_id: task.id,
                        disposition: TaskDisposition::Failed,
                        error_message: message.clone(),
                        event: event.map(|event| failed_event(event, &message)),
                        receipt: None,
                        profile: None,
                    };
                    let entry = AuditEntry::new(
                        "task_failed",
                        format!(
                            "Task #{} failed after {} attempts: {message}",
                            task.id, task.attempts
                        ),
                    )
                    .with_level(AuditLevel::Error)
                    .with_store(task.store_id)
                    .with_context(task_context(task));
                    (outcome, entry)
                } else {
                    let next_retry_at = now + self.retry_backoff(task.attempts);
                    let outcome = TaskOutcome {
                        task_id: task.id,
                        disposition: TaskDisposition::Retry { next_retry_at },
                        error_message: message.clone(),
                        event: event.map(|event| failed_event(event, &message)),
                        receipt: None,
                        profile: None,
                    };
                    let entry = AuditEntry::new(
                        "task_retry_scheduled",
                        format!(
                            "Task #{} attempt {} failed, retrying: {message}",
                            task.id, task.attempts
                        ),
                    )
                    .with_level(AuditLevel::Warn)
                    .with_store(task.store_id)
                    .with_context(task_context(task));
                    (outcome, entry)
                }
            }
        };

        self.storage.apply_outcome(now, &outcome).await?;
        self.audit.record(audit_entry).await;
        Ok(())
    }

    async fn dispatch(
        &self,
        task: &ReceiptTask,
        store: &StoreRecord,
        profile: &TaxProfile,
        event: &PaymentEvent,
    ) -> std::result::Result<DispatchOutput, DispatchFailure> {
        let provider = self.providers.build(profile)?;

        match task.kind {
            TaskKind::CreateReceipt => {
                let context = build_event_context(&event.payload, store);
                let description = render_template(&store.description_template, &context);
                let amount = coerce_amount(context.get("amount"));

                let request = ReceiptRequest {
                    description: description.clone(),
                    amount,
                    payment_id: task.payment_id.clone(),
                    event_payload: event.payload.clone(),
                };
                let issued = provider.create_receipt(&request).await?;

                let targets = self
                    .storage
                    .relay_targets(store.id)
                    .await
                    .map_err(|e| DispatchFailure::Transient(e.to_string()))?;
                let relay_status = self
                    .notifier
                    .relay_event(store, &targets, &event.payload, &issued.receipt_url)
                    .await;

                self.notify_chat(
                    store.id,
                    "receipt_created",
                    &format!("Receipt issued for payment {}", task.payment_id),
                    &issued.receipt_url,
                )
                .await;

                Ok(DispatchOutput {
                    receipt: Some(ReceiptWrite::Create(NewReceipt {
                        store_id: store.id,
                        task_id: task.id,
                        payment_id: task.payment_id.clone(),
                        provider_receipt_id: issued.receipt_id,
                        receipt_url: issued.receipt_url,
                        amount,
                        currency: "RUB".to_string(),
                        description,
                        raw_response: issued.raw,
                    })),
                    relay_status: Some(relay_status.as_str().to_string()),
                })
            }
            TaskKind::CancelReceipt => {
                let receipt_id = task
                    .payload
                    .get("receipt_uuid")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if receipt_id.is_empty() {
                    return Err(DispatchFailure::Fatal(
                        "cancellation task carries no receipt_uuid".to_string(),
                    ));
                }

                provider.cancel_receipt(&receipt_id).await?;

                self.notify_chat(
                    store.id,
                    "receipt_canceled",
                    &format!("Receipt canceled for payment {}", task.payment_id),
                    "",
                )
                .await;

                Ok(DispatchOutput {
                    receipt: Some(ReceiptWrite::Cancel {
                        store_id: store.id,
                        payment_id: task.payment_id.clone(),
                        canceled_at: Utc::now(),
                    }),
                    relay_status: None,
                })
            }
        }
    }

    /// Chat delivery is best-effort end to end: even a failure to load the
    /// channel list only logs.
    async fn notify_chat(&self, store_id: i64, event_name: &str, message: &str, receipt_url: &str) {
        match self.storage.chat_channels(store_id).await {
            Ok(channels) => {
                self.notifier
                    .notify_channels(&channels, event_name, message, receipt_url)
                    .await;
            }
            Err(err) => {
                warn!(store_id, event = event_name, error = %err, "failed to load chat channels");
            }
        }
    }

    /// Linear backoff scaled by the cumulative attempt count, capped.
    fn retry_backoff(&self, attempts: i32) -> ChronoDuration {
        let step = self.config.backoff_step.as_secs() as i64;
        let cap = self.config.backoff_cap.as_secs() as i64;
        ChronoDuration::seconds((i64::from(attempts.max(0)) * step).min(cap))
    }
}

/// Per-pass terminal state, resolved before the outcome commit.
enum FinishState {
    Success {
        output: DispatchOutput,
        generated_device_id: Option<String>,
    },
    Auth(String),
    Fatal(String),
    Transient(String),
}

fn failed_event(event: &PaymentEvent, message: &str) -> EventUpdate {
    EventUpdate {
        event_id: event.id,
        status: EventStatus::Failed,
        error_message: message.to_string(),
        processed_at: None,
        relay_status: None,
    }
}

fn task_context(task: &ReceiptTask) -> Value {
    serde_json::json!({
        "task_id": task.id,
        "payment_id": task.payment_id,
        "kind": task.kind,
        "attempts": task.attempts,
        "max_attempts": task.max_attempts,
    })
}

fn chrono_secs(duration: Duration) -> ChronoDuration {
    ChronoDuration::seconds(duration.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RelayStatus;
    use crate::storage::InMemoryStorage;
    use async_trait::async_trait;
    use crate::models::{ChatChannel, RelayTarget};
    use crate::provider::FiscalProvider;

    struct NoopFactory;

    impl ProviderFactory for NoopFactory {
        fn build(
            &self,
            _profile: &TaxProfile,
        ) -> std::result::Result<Box<dyn FiscalProvider>, ProviderError> {
            Err(ProviderError::Configuration("unused".to_string()))
        }
    }

    struct NoopSink;

    #[async_trait]
    impl NotificationSink for NoopSink {
        async fn relay_event(
            &self,
            _store: &StoreRecord,
            _targets: &[RelayTarget],
            _payload: &Value,
            _receipt_url: &str,
        ) -> RelayStatus {
            RelayStatus::NoTargets
        }

        async fn notify_channels(
            &self,
            _channels: &[ChatChannel],
            _event_name: &str,
            _message: &str,
            _receipt_url: &str,
        ) {
        }
    }

    fn test_worker() -> ReceiptWorker {
        ReceiptWorker::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(NoopFactory),
            Arc::new(NoopSink),
            WorkerConfig::default(),
        )
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let worker = test_worker();
        assert_eq!(worker.retry_backoff(1), ChronoDuration::seconds(20));
        assert_eq!(worker.retry_backoff(3), ChronoDuration::seconds(60));
        assert_eq!(worker.retry_backoff(14), ChronoDuration::seconds(280));
        assert_eq!(worker.retry_backoff(15), ChronoDuration::seconds(300));
        assert_eq!(worker.retry_backoff(100), ChronoDuration::seconds(300));
        assert_eq!(worker.retry_backoff(0), ChronoDuration::seconds(0));
    }

    #[test]
    fn backoff_is_monotonically_non_decreasing() {
        let worker = test_worker();
        let mut previous = ChronoDuration::seconds(0);
        for attempts in 0..40 {
            let current = worker.retry_backoff(attempts);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[tokio::test]
    async fn empty_queue_tick_is_a_noop() {
        let worker = test_worker();
        assert!(!worker.tick().await.unwrap());
    }

    #[test]
    fn provider_auth_error_maps_to_auth_bucket() {
        let failure =
            DispatchFailure::from(ProviderError::AuthRequired("expired".to_string()));
        assert!(matches!(failure, DispatchFailure::Auth(_)));

        let failure = DispatchFailure::from(ProviderError::Api {
            status: 500,
            body: "boom".to_string(),
            details: None,
        });
        assert!(matches!(failure, DispatchFailure::Transient(_)));

        let failure =
            DispatchFailure::from(ProviderError::Transport("timeout".to_string()));
        assert!(matches!(failure, DispatchFailure::Transient(_)));
    }
}
