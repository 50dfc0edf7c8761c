//! # In-Memory Storage
//!
//! Mutex-guarded implementation of [`Storage`] with the same transactional
//! shape as the PostgreSQL backend: claims and outcome commits each happen
//! inside a single critical section. Backs the test suite and embedded runs
//! where durability is not required.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::{QueueCounts, ReceiptWrite, Storage, TaskOutcome};
use crate::audit::{AuditEntry, AuditRecord};
use crate::error::{RelayError, Result};
use crate::models::{
    ChatChannel, NewPaymentEvent, NewReceiptTask, PaymentEvent, Receipt, ReceiptStatus,
    ReceiptTask, RelayTarget, StoreRecord, TaskStatus, TaxProfile, DEFAULT_MAX_ATTEMPTS,
};

#[derive(Default)]
struct Inner {
    next_id: i64,
    stores: Vec<StoreRecord>,
    profiles: Vec<TaxProfile>,
    relay_targets: Vec<RelayTarget>,
    chat_channels: Vec<ChatChannel>,
    events: Vec<PaymentEvent>,
    tasks: Vec<ReceiptTask>,
    receipts: Vec<Receipt>,
    audits: Vec<AuditRecord>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a store, assigning an id when none is set.
    pub fn seed_store(&self, mut store: StoreRecord) -> i64 {
        let mut inner = self.inner.lock();
        if store.id == 0 {
            store.id = inner.next_id();
        }
        let id = store.id;
        inner.stores.push(store);
        id
    }

    pub fn seed_profile(&self, mut profile: TaxProfile) -> i64 {
        let mut inner = self.inner.lock();
        if profile.id == 0 {
            profile.id = inner.next_id();
        }
        let id = profile.id;
        inner.profiles.push(profile);
        id
    }

    pub fn seed_relay_target(&self, mut target: RelayTarget) -> i64 {
        let mut inner = self.inner.lock();
        if target.id == 0 {
            target.id = inner.next_id();
        }
        let id = target.id;
        inner.relay_targets.push(target);
        id
    }

    pub fn seed_chat_channel(&self, mut channel: ChatChannel) -> i64 {
        let mut inner = self.inner.lock();
        if channel.id == 0 {
            channel.id = inner.next_id();
        }
        let id = channel.id;
        inner.chat_channels.push(channel);
        id
    }

    /// Snapshot accessors for assertions.
    pub fn tasks(&self) -> Vec<ReceiptTask> {
        self.inner.lock().tasks.clone()
    }

    pub fn events(&self) -> Vec<PaymentEvent> {
        self.inner.lock().events.clone()
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.inner.lock().receipts.clone()
    }

    pub fn profiles(&self) -> Vec<TaxProfile> {
        self.inner.lock().profiles.clone()
    }

    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.inner.lock().audits.clone()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn claim_next_task(&self, now: DateTime<Utc>) -> Result<Option<ReceiptTask>> {
        let mut inner = self.inner.lock();
        let claimed = inner
            .tasks
            .iter_mut()
            .filter(|task| task.is_eligible(now))
            .min_by_key(|task| (task.created_at, task.id));

        Ok(claimed.map(|task| {
            task.status = TaskStatus::Processing;
            task.attempts += 1;
            task.updated_at = now;
            task.clone()
        }))
    }

    async fn apply_outcome(&self, now: DateTime<Utc>, outcome: &TaskOutcome) -> Result<()> {
        let mut inner = self.inner.lock();

        {
            let task = inner
                .tasks
                .iter_mut()
                .find(|task| task.id == outcome.task_id)
                .ok_or_else(|| {
                    RelayError::DatabaseError(format!("unknown task {}", outcome.task_id))
                })?;
            task.status = outcome.disposition.status();
            task.error_message = outcome.error_message.clone();
            if let Some(next_retry_at) = outcome.disposition.next_retry_at() {
                task.next_retry_at = next_retry_at;
            }
            task.updated_at = now;
        }

        if let Some(update) = &outcome.event {
            if let Some(event) = inner.events.iter_mut().find(|e| e.id == update.event_id) {
                event.status = update.status;
                event.error_message = update.error_message.clone();
                event.processed_at = update.processed_at;
                if let Some(relay_status) = &update.relay_status {
                    event.relay_status = relay_status.clone();
                }
            }
        }

        if let Some(write) = &outcome.receipt {
            match write {
                ReceiptWrite::Create(new_receipt) => {
                    let id = inner.next_id();
                    inner.receipts.push(Receipt {
                        id,
                        store_id: new_receipt.store_id,
                        task_id: new_receipt.task_id,
                        payment_id: new_receipt.payment_id.clone(),
                        provider_receipt_id: new_receipt.provider_receipt_id.clone(),
                        receipt_url: new_receipt.receipt_url.clone(),
                        amount: new_receipt.amount,
                        currency: new_receipt.currency.clone(),
                        description: new_receipt.description.clone(),
                        status: ReceiptStatus::Created,
                        raw_response: new_receipt.raw_response.clone(),
                        created_at: now,
                        canceled_at: None,
                    });
                }
                ReceiptWrite::Cancel { store_id, payment_id, canceled_at } => {
                    let current = inner
                        .receipts
                        .iter_mut()
                        .filter(|r| {
                            r.store_id == *store_id
                                && r.payment_id == *payment_id
                                && r.status == ReceiptStatus::Created
                        })
                        .max_by_key(|r| (r.created_at, r.id));
                    if let Some(receipt) = current {
                        receipt.status = ReceiptStatus::Canceled;
                        receipt.canceled_at = Some(*canceled_at);
                    }
                }
            }
        }

        if let Some(update) = &outcome.profile {
            if let Some(profile) =
                inner.profiles.iter_mut().find(|p| p.id == update.profile_id)
            {
                if let Some(is_authenticated) = update.is_authenticated {
                    profile.is_authenticated = is_authenticated;
                }
                if let Some(last_error) = &update.last_error {
                    profile.last_error = last_error.clone();
                }
                if let Some(device_id) = &update.device_id {
                    profile.device_id = device_id.clone();
                }
                profile.updated_at = now;
            }
        }

        Ok(())
    }

    async fn task_by_id(&self, task_id: i64) -> Result<Option<ReceiptTask>> {
        Ok(self.inner.lock().tasks.iter().find(|t| t.id == task_id).cloned())
    }

    async fn store_by_id(&self, store_id: i64) -> Result<Option<StoreRecord>> {
        Ok(self.inner.lock().stores.iter().find(|s| s.id == store_id).cloned())
    }

    async fn profile_by_id(&self, profile_id: i64) -> Result<Option<TaxProfile>> {
        Ok(self.inner.lock().profiles.iter().find(|p| p.id == profile_id).cloned())
    }

    async fn event_by_id(&self, event_id: i64) -> Result<Option<PaymentEvent>> {
        Ok(self.inner.lock().events.iter().find(|e| e.id == event_id).cloned())
    }

    async fn relay_targets(&self, store_id: i64) -> Result<Vec<RelayTarget>> {
        Ok(self
            .inner
            .lock()
            .relay_targets
            .iter()
            .filter(|t| t.store_id == store_id && t.is_active)
            .cloned()
            .collect())
    }

    async fn chat_channels(&self, store_id: i64) -> Result<Vec<ChatChannel>> {
        Ok(self
            .inner
            .lock()
            .chat_channels
            .iter()
            .filter(|c| c.store_id == store_id && c.is_active)
            .cloned()
            .collect())
    }

    async fn latest_receipt(&self, store_id: i64, payment_id: &str) -> Result<Option<Receipt>> {
        Ok(self
            .inner
            .lock()
            .receipts
            .iter()
            .filter(|r| r.store_id == store_id && r.payment_id == payment_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn insert_event(&self, event: NewPaymentEvent) -> Result<PaymentEvent> {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        let stored = PaymentEvent {
            id,
            store_id: event.store_id,
            event_type: event.event_type,
            payment_id: event.payment_id,
            payload: event.payload,
            status: Default::default(),
            relay_status: "pending".to_string(),
            error_message: String::new(),
            received_at: Utc::now(),
            processed_at: None,
        };
        inner.events.push(stored.clone());
        Ok(stored)
    }

    async fn enqueue_task(&self, task: NewReceiptTask) -> Result<ReceiptTask> {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        let now = Utc::now();
        let stored = ReceiptTask {
            id,
            store_id: task.store_id,
            event_id: task.event_id,
            payment_id: task.payment_id,
            kind: task.kind,
            payload: task.payload,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: task.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            next_retry_at: now,
            error_message: String::new(),
            created_at: now,
            updated_at: now,
        };
        inner.tasks.push(stored.clone());
        Ok(stored)
    }

    async fn requeue_task(&self, task_id: i64, now: DateTime<Utc>) -> Result<Option<ReceiptTask>> {
        let mut inner = self.inner.lock();
        let task = inner.tasks.iter_mut().find(|t| t.id == task_id);
        Ok(task.map(|task| {
            task.status = TaskStatus::Pending;
            task.error_message = String::new();
            task.next_retry_at = now;
            task.updated_at = now;
            task.clone()
        }))
    }

    async fn recover_stale_processing(
        &self,
        now: DateTime<Utc>,
        grace: std::time::Duration,
    ) -> Result<Vec<i64>> {
        let cutoff = now
            - Duration::from_std(grace)
                .map_err(|e| RelayError::ValidationError(format!("grace period: {e}")))?;
        let mut inner = self.inner.lock();
        let mut recovered = Vec::new();
        for task in &mut inner.tasks {
            if task.status == TaskStatus::Processing && task.updated_at <= cutoff {
                task.status = TaskStatus::Pending;
                task.next_retry_at = now;
                task.updated_at = now;
                recovered.push(task.id);
            }
        }
        Ok(recovered)
    }

    async fn queue_counts(&self) -> Result<QueueCounts> {
        let inner = self.inner.lock();
        let mut counts = QueueCounts::default();
        for task in &inner.tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Success => counts.success += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::WaitingAuth => counts.waiting_auth += 1,
            }
        }
        Ok(counts)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        inner.audits.push(AuditRecord {
            id,
            store_id: entry.store_id,
            level: entry.level.as_str().to_string(),
            event: entry.event.clone(),
            message: entry.message.clone(),
            context: entry.context.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskKind;
    use serde_json::json;

    async fn new_task(storage: &InMemoryStorage, payment_id: &str) -> ReceiptTask {
        storage
            .enqueue_task(NewReceiptTask {
                store_id: 1,
                event_id: 1,
                payment_id: payment_id.to_string(),
                kind: TaskKind::CreateReceipt,
                payload: json!({}),
                max_attempts: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn claim_is_fifo_and_marks_processing() {
        let storage = InMemoryStorage::new();
        let first = new_task(&storage, "pay-1").await;
        let _second = new_task(&storage, "pay-2").await;

        let claimed = storage.claim_next_task(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, TaskStatus::Processing);
        assert_eq!(claimed.attempts, 1);

        // The claimed task is out of the pool until its outcome is applied.
        let next = storage.claim_next_task(Utc::now()).await.unwrap().unwrap();
        assert_eq!(next.payment_id, "pay-2");
        assert!(storage.claim_next_task(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requeue_resets_any_state() {
        let storage = InMemoryStorage::new();
        let task = new_task(&storage, "pay-1").await;
        storage.claim_next_task(Utc::now()).await.unwrap().unwrap();

        let now = Utc::now();
        let requeued = storage.requeue_task(task.id, now).await.unwrap().unwrap();
        assert_eq!(requeued.status, TaskStatus::Pending);
        assert_eq!(requeued.error_message, "");
        assert_eq!(requeued.next_retry_at, now);
        // Attempts are history, not state; requeue keeps them.
        assert_eq!(requeued.attempts, 1);
    }

    #[tokio::test]
    async fn stale_processing_tasks_are_recovered_with_attempts_unchanged() {
        let storage = InMemoryStorage::new();
        let task = new_task(&storage, "pay-1").await;
        storage.claim_next_task(Utc::now()).await.unwrap().unwrap();

        let later = Utc::now() + Duration::seconds(600);
        let recovered = storage
            .recover_stale_processing(later, std::time::Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(recovered, vec![task.id]);

        let task = storage.task_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 1);
    }

    #[tokio::test]
    async fn fresh_processing_tasks_are_left_alone() {
        let storage = InMemoryStorage::new();
        new_task(&storage, "pay-1").await;
        storage.claim_next_task(Utc::now()).await.unwrap().unwrap();

        let recovered = storage
            .recover_stale_processing(Utc::now(), std::time::Duration::from_secs(300))
            .await
            .unwrap();
        assert!(recovered.is_empty());
    }
}
