//! Shared fixtures for the integration suites: a scripted fiscal provider,
//! a recording notification sink, and an in-memory queue seeded with one
//! configured store and credential profile.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use receipt_relay::models::{
    ChatChannel, NewPaymentEvent, NewReceiptTask, PaymentEvent, ReceiptTask, RelayTarget,
    StoreRecord, TaskKind, TaxProfile, TaxProvider,
};
use receipt_relay::notify::{NotificationSink, RelayStatus};
use receipt_relay::provider::{
    FiscalProvider, IssuedReceipt, ProviderError, ProviderFactory, ReceiptRequest,
};
use receipt_relay::storage::{InMemoryStorage, Storage};
use receipt_relay::worker::{ReceiptWorker, WorkerConfig};

/// One planned provider response, consumed in order.
#[derive(Debug, Clone)]
pub enum Planned {
    CreateOk { receipt_id: &'static str, receipt_url: &'static str },
    CancelOk,
    AuthRequired(&'static str),
    ApiError(u16, &'static str),
    Transport(&'static str),
}

#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub operation: &'static str,
    pub payment_id: String,
    pub description: String,
    pub amount: f64,
    pub receipt_id: String,
}

#[derive(Default)]
pub struct ScriptedFactory {
    script: Mutex<VecDeque<Planned>>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl ScriptedFactory {
    pub fn plan(&self, planned: Planned) {
        self.script.lock().push_back(planned);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }
}

struct ScriptedProvider {
    factory: Arc<ScriptedFactory>,
}

impl ScriptedProvider {
    fn next_planned(&self) -> Planned {
        self.factory
            .script
            .lock()
            .pop_front()
            .unwrap_or(Planned::Transport("script exhausted"))
    }
}

fn planned_error(planned: Planned) -> ProviderError {
    match planned {
        Planned::AuthRequired(message) => ProviderError::AuthRequired(message.to_string()),
        Planned::ApiError(status, body) => ProviderError::Api {
            status,
            body: body.to_string(),
            details: None,
        },
        Planned::Transport(message) => ProviderError::Transport(message.to_string()),
        other => ProviderError::Transport(format!("unexpected plan: {other:?}")),
    }
}

#[async_trait::async_trait]
impl FiscalProvider for ScriptedProvider {
    async fn create_receipt(
        &self,
        request: &ReceiptRequest,
    ) -> Result<IssuedReceipt, ProviderError> {
        self.factory.calls.lock().push(ProviderCall {
            operation: "create",
            payment_id: request.payment_id.clone(),
            description: request.description.clone(),
            amount: request.amount,
            receipt_id: String::new(),
        });
        match self.next_planned() {
            Planned::CreateOk { receipt_id, receipt_url } => Ok(IssuedReceipt {
                receipt_id: receipt_id.to_string(),
                receipt_url: receipt_url.to_string(),
                raw: json!({"approvedReceiptUuid": receipt_id}),
            }),
            other => Err(planned_error(other)),
        }
    }

    async fn cancel_receipt(&self, receipt_id: &str) -> Result<Value, ProviderError> {
        self.factory.calls.lock().push(ProviderCall {
            operation: "cancel",
            payment_id: String::new(),
            description: String::new(),
            amount: 0.0,
            receipt_id: receipt_id.to_string(),
        });
        match self.next_planned() {
            Planned::CancelOk => Ok(json!({})),
            other => Err(planned_error(other)),
        }
    }
}

/// Newtype so the test crate can implement the foreign `ProviderFactory`
/// trait — the orphan rule forbids implementing it for `Arc<ScriptedFactory>`
/// directly (`Arc` is not a local or fundamental type here).
#[derive(Clone)]
pub struct ScriptedFactoryHandle(pub Arc<ScriptedFactory>);

impl ProviderFactory for ScriptedFactoryHandle {
    fn build(&self, _profile: &TaxProfile) -> Result<Box<dyn FiscalProvider>, ProviderError> {
        Ok(Box::new(ScriptedProvider { factory: self.0.clone() }))
    }
}

#[derive(Debug, Clone)]
pub struct ChatCall {
    pub event_name: String,
    pub message: String,
    pub receipt_url: String,
    pub channels: usize,
}

#[derive(Debug, Clone)]
pub struct RelayCall {
    pub store_id: i64,
    pub targets: usize,
    pub receipt_url: String,
}

pub struct RecordingNotifier {
    pub relay_result: Mutex<RelayStatus>,
    relay_calls: Mutex<Vec<RelayCall>>,
    chat_calls: Mutex<Vec<ChatCall>>,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self {
            relay_result: Mutex::new(RelayStatus::Success),
            relay_calls: Mutex::new(Vec::new()),
            chat_calls: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingNotifier {
    pub fn set_relay_result(&self, status: RelayStatus) {
        *self.relay_result.lock() = status;
    }

    pub fn relay_calls(&self) -> Vec<RelayCall> {
        self.relay_calls.lock().clone()
    }

    pub fn chat_calls(&self) -> Vec<ChatCall> {
        self.chat_calls.lock().clone()
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingNotifier {
    async fn relay_event(
        &self,
        store: &StoreRecord,
        targets: &[RelayTarget],
        _payload: &Value,
        receipt_url: &str,
    ) -> RelayStatus {
        self.relay_calls.lock().push(RelayCall {
            store_id: store.id,
            targets: targets.len(),
            receipt_url: receipt_url.to_string(),
        });
        *self.relay_result.lock()
    }

    async fn notify_channels(
        &self,
        channels: &[ChatChannel],
        event_name: &str,
        message: &str,
        receipt_url: &str,
    ) {
        self.chat_calls.lock().push(ChatCall {
            event_name: event_name.to_string(),
            message: message.to_string(),
            receipt_url: receipt_url.to_string(),
            channels: channels.len(),
        });
    }
}

/// A worker wired to in-memory storage, one store, and one authenticated
/// consumer-API profile.
pub struct Fixture {
    pub storage: Arc<InMemoryStorage>,
    pub factory: Arc<ScriptedFactory>,
    pub notifier: Arc<RecordingNotifier>,
    pub worker: ReceiptWorker,
    pub store_id: i64,
    pub profile_id: i64,
}

impl Fixture {
    pub fn new() -> Self {
        let storage = Arc::new(InMemoryStorage::new());

        let mut profile = TaxProfile::new("fixture-profile", TaxProvider::ConsumerApi);
        profile.is_authenticated = true;
        profile.access_token = "tok".to_string();
        let profile_id = storage.seed_profile(profile);

        let mut store = StoreRecord::new("fixture-store");
        store.tax_profile_id = Some(profile_id);
        let store_id = storage.seed_store(store);

        let factory = Arc::new(ScriptedFactory::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let worker = ReceiptWorker::new(
            storage.clone(),
            Arc::new(ScriptedFactoryHandle(factory.clone())),
            notifier.clone(),
            WorkerConfig::default(),
        );

        Self { storage, factory, notifier, worker, store_id, profile_id }
    }

    /// Persist an event and its derived `create_receipt` task.
    pub async fn seed_create_task(
        &self,
        payment_id: &str,
        payload: Value,
    ) -> (PaymentEvent, ReceiptTask) {
        let event = self
            .storage
            .insert_event(NewPaymentEvent {
                store_id: self.store_id,
                event_type: "payment.succeeded".to_string(),
                payment_id: payment_id.to_string(),
                payload,
            })
            .await
            .unwrap();
        let task = self
            .storage
            .enqueue_task(NewReceiptTask {
                store_id: self.store_id,
                event_id: event.id,
                payment_id: payment_id.to_string(),
                kind: TaskKind::CreateReceipt,
                payload: json!({}),
                max_attempts: None,
            })
            .await
            .unwrap();
        (event, task)
    }

    /// Persist an event and its derived `cancel_receipt` task.
    pub async fn seed_cancel_task(
        &self,
        payment_id: &str,
        receipt_uuid: Option<&str>,
    ) -> (PaymentEvent, ReceiptTask) {
        let event = self
            .storage
            .insert_event(NewPaymentEvent {
                store_id: self.store_id,
                event_type: "refund.succeeded".to_string(),
                payment_id: payment_id.to_string(),
                payload: json!({}),
            })
            .await
            .unwrap();
        let payload = match receipt_uuid {
            Some(uuid) => json!({"receipt_uuid": uuid}),
            None => json!({}),
        };
        let task = self
            .storage
            .enqueue_task(NewReceiptTask {
                store_id: self.store_id,
                event_id: event.id,
                payment_id: payment_id.to_string(),
                kind: TaskKind::CancelReceipt,
                payload,
                max_attempts: None,
            })
            .await
            .unwrap();
        (event, task)
    }
}

/// A webhook payload shaped like the default store extraction paths.
pub fn payment_payload(payment_id: &str, amount: &str, customer: &str) -> Value {
    json!({
        "event": "payment.succeeded",
        "object": {
            "id": payment_id,
            "amount": {"value": amount, "currency": "RUB"},
            "metadata": {"customer_name": customer},
        }
    })
}
