//! # PostgreSQL Storage
//!
//! Production [`Storage`] backend. Task claiming rides on
//! `FOR UPDATE SKIP LOCKED` so the selection-and-mark step stays a single
//! atomic operation even with multiple worker processes polling the same
//! database; outcome commits wrap every write of a pass in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::{QueueCounts, ReceiptWrite, Storage, TaskOutcome};
use crate::audit::AuditEntry;
use crate::error::{RelayError, Result};
use crate::models::{
    ChatChannel, NewPaymentEvent, NewReceiptTask, PaymentEvent, Receipt, ReceiptTask, RelayTarget,
    StoreRecord, TaxProfile, DEFAULT_MAX_ATTEMPTS,
};

const TASK_COLUMNS: &str = "id, store_id, event_id, payment_id, kind, payload, status, \
                            attempts, max_attempts, next_retry_at, error_message, \
                            created_at, updated_at";

pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema; safe to run repeatedly.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/0001_init.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_task(row: &PgRow) -> Result<ReceiptTask> {
    Ok(ReceiptTask {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        event_id: row.try_get("event_id")?,
        payment_id: row.try_get("payment_id")?,
        kind: row
            .try_get::<String, _>("kind")?
            .parse()
            .map_err(RelayError::DatabaseError)?,
        payload: row.try_get("payload")?,
        status: row
            .try_get::<String, _>("status")?
            .parse()
            .map_err(RelayError::DatabaseError)?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        next_retry_at: row.try_get("next_retry_at")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_event(row: &PgRow) -> Result<PaymentEvent> {
    Ok(PaymentEvent {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        event_type: row.try_get("event_type")?,
        payment_id: row.try_get("payment_id")?,
        payload: row.try_get("payload")?,
        status: row
            .try_get::<String, _>("status")?
            .parse()
            .map_err(RelayError::DatabaseError)?,
        relay_status: row.try_get("relay_status")?,
        error_message: row.try_get("error_message")?,
        received_at: row.try_get("received_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn map_store(row: &PgRow) -> Result<StoreRecord> {
    Ok(StoreRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        description_template: row.try_get("description_template")?,
        payment_id_path: row.try_get("payment_id_path")?,
        amount_path: row.try_get("amount_path")?,
        customer_name_path: row.try_get("customer_name_path")?,
        relay_mode: row
            .try_get::<String, _>("relay_mode")?
            .parse()
            .map_err(RelayError::DatabaseError)?,
        relay_retry_limit: row.try_get("relay_retry_limit")?,
        include_receipt_url_in_relay: row.try_get("include_receipt_url_in_relay")?,
        tax_profile_id: row.try_get("tax_profile_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_profile(row: &PgRow) -> Result<TaxProfile> {
    Ok(TaxProfile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        provider: row
            .try_get::<String, _>("provider")?
            .parse()
            .map_err(RelayError::DatabaseError)?,
        taxpayer_id: row.try_get("taxpayer_id")?,
        phone: row.try_get("phone")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        cookie_blob: row.try_get("cookie_blob")?,
        device_id: row.try_get("device_id")?,
        is_authenticated: row.try_get("is_authenticated")?,
        last_error: row.try_get("last_error")?,
        last_auth_at: row.try_get("last_auth_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_receipt(row: &PgRow) -> Result<Receipt> {
    Ok(Receipt {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        task_id: row.try_get("task_id")?,
        payment_id: row.try_get("payment_id")?,
        provider_receipt_id: row.try_get("provider_receipt_id")?,
        receipt_url: row.try_get("receipt_url")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        description: row.try_get("description")?,
        status: row
            .try_get::<String, _>("status")?
            .parse()
            .map_err(RelayError::DatabaseError)?,
        raw_response: row.try_get("raw_response")?,
        created_at: row.try_get("created_at")?,
        canceled_at: row.try_get("canceled_at")?,
    })
}

fn map_relay_target(row: &PgRow) -> Result<RelayTarget> {
    Ok(RelayTarget {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        method: row.try_get("method")?,
        headers: row.try_get("headers")?,
        payload_template: row.try_get("payload_template")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_chat_channel(row: &PgRow) -> Result<ChatChannel> {
    let events: serde_json::Value = row.try_get("events")?;
    Ok(ChatChannel {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        name: row.try_get("name")?,
        bot_token: row.try_get("bot_token")?,
        chat_id: row.try_get("chat_id")?,
        topic_id: row.try_get("topic_id")?,
        events: serde_json::from_value(events).unwrap_or_default(),
        include_receipt_url: row.try_get("include_receipt_url")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Storage for PgStorage {
    async fn claim_next_task(&self, now: DateTime<Utc>) -> Result<Option<ReceiptTask>> {
        // Selection and the processing mark are one statement: concurrent
        // workers skip locked candidates instead of double-claiming.
        let sql = format!(
            r"
            UPDATE receipt_tasks t
            SET status = 'processing', attempts = t.attempts + 1, updated_at = $1
            FROM (
                SELECT id AS claimed_id FROM receipt_tasks
                WHERE status IN ('pending', 'waiting_auth') AND next_retry_at <= $1
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            ) next_task
            WHERE t.id = next_task.claimed_id
            RETURNING {TASK_COLUMNS}
            "
        );
        let row = sqlx::query(&sql).bind(now).fetch_optional(&self.pool).await?;
        row.as_ref().map(map_task).transpose()
    }

    async fn apply_outcome(&self, now: DateTime<Utc>, outcome: &TaskOutcome) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            UPDATE receipt_tasks
            SET status = $2, error_message = $3,
                next_retry_at = COALESCE($4, next_retry_at), updated_at = $1
            WHERE id = $5
            ",
        )
        .bind(now)
        .bind(outcome.disposition.status().to_string())
        .bind(&outcome.error_message)
        .bind(outcome.disposition.next_retry_at())
        .bind(outcome.task_id)
        .execute(&mut *tx)
        .await?;

        if let Some(update) = &outcome.event {
            sqlx::query(
                r"
                UPDATE payment_events
                SET status = $2, error_message = $3, processed_at = $4,
                    relay_status = COALESCE($5, relay_status)
                WHERE id = $1
                ",
            )
            .bind(update.event_id)
            .bind(update.status.to_string())
            .bind(&update.error_message)
            .bind(update.processed_at)
            .bind(&update.relay_status)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(write) = &outcome.receipt {
            match write {
                ReceiptWrite::Create(receipt) => {
                    sqlx::query(
                        r"
                        INSERT INTO receipts (
                            store_id, task_id, payment_id, provider_receipt_id,
                            receipt_url, amount, currency, description,
                            status, raw_response, created_at
                        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'created', $9, $10)
                        ",
                    )
                    .bind(receipt.store_id)
                    .bind(receipt.task_id)
                    .bind(&receipt.payment_id)
                    .bind(&receipt.provider_receipt_id)
                    .bind(&receipt.receipt_url)
                    .bind(receipt.amount)
                    .bind(&receipt.currency)
                    .bind(&receipt.description)
                    .bind(&receipt.raw_response)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                ReceiptWrite::Cancel { store_id, payment_id, canceled_at } => {
                    sqlx::query(
                        r"
                        UPDATE receipts
                        SET status = 'canceled', canceled_at = $3
                        WHERE id = (
                            SELECT id FROM receipts
                            WHERE store_id = $1 AND payment_id = $2 AND status = 'created'
                            ORDER BY created_at DESC, id DESC
                            LIMIT 1
                        )
                        ",
                    )
                    .bind(store_id)
                    .bind(payment_id)
                    .bind(canceled_at)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        if let Some(update) = &outcome.profile {
            sqlx::query(
                r"
                UPDATE tax_profiles
                SET is_authenticated = COALESCE($2, is_authenticated),
                    last_error = COALESCE($3, last_error),
                    device_id = COALESCE($4, device_id),
                    updated_at = $1
                WHERE id = $5
                ",
            )
            .bind(now)
            .bind(update.is_authenticated)
            .bind(&update.last_error)
            .bind(&update.device_id)
            .bind(update.profile_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn task_by_id(&self, task_id: i64) -> Result<Option<ReceiptTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM receipt_tasks WHERE id = $1");
        let row = sqlx::query(&sql).bind(task_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(map_task).transpose()
    }

    async fn store_by_id(&self, store_id: i64) -> Result<Option<StoreRecord>> {
        let row = sqlx::query("SELECT * FROM stores WHERE id = $1")
            .bind(store_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_store).transpose()
    }

    async fn profile_by_id(&self, profile_id: i64) -> Result<Option<TaxProfile>> {
        let row = sqlx::query("SELECT * FROM tax_profiles WHERE id = $1")
            .bind(profile_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_profile).transpose()
    }

    async fn event_by_id(&self, event_id: i64) -> Result<Option<PaymentEvent>> {
        let row = sqlx::query("SELECT * FROM payment_events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_event).transpose()
    }

    async fn relay_targets(&self, store_id: i64) -> Result<Vec<RelayTarget>> {
        let rows = sqlx::query(
            "SELECT * FROM relay_targets WHERE store_id = $1 AND is_active ORDER BY id",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_relay_target).collect()
    }

    async fn chat_channels(&self, store_id: i64) -> Result<Vec<ChatChannel>> {
        let rows = sqlx::query(
            "SELECT * FROM chat_channels WHERE store_id = $1 AND is_active ORDER BY id",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_chat_channel).collect()
    }

    async fn latest_receipt(&self, store_id: i64, payment_id: &str) -> Result<Option<Receipt>> {
        let row = sqlx::query(
            r"
            SELECT * FROM receipts
            WHERE store_id = $1 AND payment_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(store_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_receipt).transpose()
    }

    async fn insert_event(&self, event: NewPaymentEvent) -> Result<PaymentEvent> {
        let row = sqlx::query(
            r"
            INSERT INTO payment_events (
                store_id, event_type, payment_id, payload,
                status, relay_status, error_message, received_at
            ) VALUES ($1, $2, $3, $4, 'received', 'pending', '', $5)
            RETURNING *
            ",
        )
        .bind(event.store_id)
        .bind(&event.event_type)
        .bind(&event.payment_id)
        .bind(&event.payload)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        map_event(&row)
    }

    async fn enqueue_task(&self, task: NewReceiptTask) -> Result<ReceiptTask> {
        let now = Utc::now();
        let sql = format!(
            r"
            INSERT INTO receipt_tasks (
                store_id, event_id, payment_id, kind, payload,
                status, attempts, max_attempts, next_retry_at, error_message,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, '', $7, $7)
            RETURNING {TASK_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(task.store_id)
            .bind(task.event_id)
            .bind(&task.payment_id)
            .bind(task.kind.to_string())
            .bind(&task.payload)
            .bind(task.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS))
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        map_task(&row)
    }

    async fn requeue_task(&self, task_id: i64, now: DateTime<Utc>) -> Result<Option<ReceiptTask>> {
        let sql = format!(
            r"
            UPDATE receipt_tasks
            SET status = 'pending', error_message = '', next_retry_at = $1, updated_at = $1
            WHERE id = $2
            RETURNING {TASK_COLUMNS}
            "
        );
        let row = sqlx::query(&sql).bind(now).bind(task_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(map_task).transpose()
    }

    async fn recover_stale_processing(
        &self,
        now: DateTime<Utc>,
        grace: std::time::Duration,
    ) -> Result<Vec<i64>> {
        let cutoff = now
            - chrono::Duration::from_std(grace)
                .map_err(|e| RelayError::ValidationError(format!("grace period: {e}")))?;
        let ids = sqlx::query_scalar::<_, i64>(
            r"
            UPDATE receipt_tasks
            SET status = 'pending', next_retry_at = $1, updated_at = $1
            WHERE status = 'processing' AND updated_at <= $2
            RETURNING id
            ",
        )
        .bind(now)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn queue_counts(&self) -> Result<QueueCounts> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS total FROM receipt_tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut counts = QueueCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            match status.as_str() {
                "pending" => counts.pending = total,
                "processing" => counts.processing = total,
                "success" => counts.success = total,
                "failed" => counts.failed = total,
                "waiting_auth" => counts.waiting_auth = total,
                other => {
                    return Err(RelayError::DatabaseError(format!(
                        "unknown task status in queue: {other}"
                    )))
                }
            }
        }
        Ok(counts)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO audit_log (store_id, level, event, message, context, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(entry.store_id)
        .bind(entry.level.as_str())
        .bind(&entry.event)
        .bind(&entry.message)
        .bind(&entry.context)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
