//! Postgres-backed [`Repository`] implementation.
//!
//! Mirrors the grounding project's `PostgresLedgerStore` shape (a thin
//! struct wrapping a `PgPool`, one method per statement, `sqlx::query`
//! rather than the macro-checked variants so this crate can build without a
//! live database at compile time) but generalizes it across the whole
//! domain and adds the transactional, multi-statement operations spec §4.2
//! and §4.5 require.

use super::{
    CreatePropertyInput, CreateUserInput, NewQrCode, PropertyFilters, Repository, ResolveDecision,
};
use crate::error::HandReceiptError;
use crate::ledger::{build_entry, genesis_hash, verify_chain, LedgerEntry as PureLedgerEntry};
use crate::types::{
    LedgerEvent, LedgerEventType, Property, PropertyStatus, QRCode, Session, Transfer,
    TransferDirection, TransferStatus, User, UserStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, HandReceiptError>> + Send + 'a>>;

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, HandReceiptError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| HandReceiptError::DatabaseUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), HandReceiptError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| HandReceiptError::DatabaseUnavailable(format!("migration failed: {e}")))
    }

    /// Run `f` inside a `REPEATABLE READ` transaction, retrying up to 3
    /// times with jittered backoff on deadlock/serialization failure, per
    /// spec §4.2.
    async fn with_tx<T, F>(&self, f: F) -> Result<T, HandReceiptError>
    where
        T: Send,
        F: for<'c> Fn(&'c mut Transaction<'_, Postgres>) -> BoxFuture<'c, T> + Send + Sync,
    {
        const MAX_ATTEMPTS: u32 = 3;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(HandReceiptError::from)?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                .execute(&mut *tx)
                .await
                .map_err(HandReceiptError::from)?;

            match f(&mut tx).await {
                Ok(value) => {
                    tx.commit().await.map_err(HandReceiptError::from)?;
                    return Ok(value);
                }
                Err(err) if is_retryable(&err) && attempt < MAX_ATTEMPTS => {
                    let _ = tx.rollback().await;
                    let jitter = Duration::from_millis(10 * 2u64.pow(attempt) + (attempt as u64 * 7));
                    tokio::time::sleep(jitter).await;
                    continue;
                }
                Err(err) => {
                    let _ = tx.rollback().await;
                    return Err(err);
                }
            }
        }
    }
}

fn is_retryable(err: &HandReceiptError) -> bool {
    matches!(err, HandReceiptError::Timeout) || matches!(err, HandReceiptError::DatabaseUnavailable(msg) if msg.contains("40P01") || msg.contains("40001"))
}

/// Appends one ledger event inside `tx`, serialized by a row lock on the
/// single `ledger_tail` row. This is the last statement of whichever
/// business transaction calls it, per spec §4.1/§5.
async fn append_ledger_event(
    tx: &mut Transaction<'_, Postgres>,
    event_type: LedgerEventType,
    property_id: i64,
    actor_user_id: i64,
    payload: Value,
) -> Result<LedgerEvent, HandReceiptError> {
    let row = sqlx::query("SELECT last_hash FROM ledger_tail FOR UPDATE")
        .fetch_one(&mut **tx)
        .await
        .map_err(HandReceiptError::from)?;
    let prev_hash: String = row.try_get("last_hash").map_err(HandReceiptError::from)?;

    let sequence: i64 = sqlx::query_scalar(
        "SELECT nextval(pg_get_serial_sequence('ledger_events', 'sequence'))",
    )
    .fetch_one(&mut **tx)
    .await
    .map_err(HandReceiptError::from)?;

    let created_at = Utc::now();
    let entry: PureLedgerEntry = build_entry(
        sequence,
        event_type,
        property_id,
        actor_user_id,
        payload,
        &prev_hash,
        created_at,
    );

    sqlx::query(
        r#"
        INSERT INTO ledger_events
            (sequence, event_type, property_id, actor_user_id, payload, prev_hash, hash, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.sequence)
    .bind(entry.event_type.as_str())
    .bind(entry.property_id)
    .bind(entry.actor_user_id)
    .bind(&entry.payload)
    .bind(&entry.prev_hash)
    .bind(&entry.hash)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await
    .map_err(HandReceiptError::from)?;

    sqlx::query("UPDATE ledger_tail SET last_hash = $1")
        .bind(&entry.hash)
        .execute(&mut **tx)
        .await
        .map_err(HandReceiptError::from)?;

    Ok(LedgerEvent {
        sequence: entry.sequence,
        event_type: entry.event_type,
        property_id: entry.property_id,
        actor_user_id: entry.actor_user_id,
        payload: entry.payload,
        prev_hash: entry.prev_hash,
        hash: entry.hash,
        created_at: entry.created_at,
    })
}

async fn fetch_property(
    executor: impl sqlx::PgExecutor<'_>,
    id: i64,
) -> Result<Option<Property>, HandReceiptError> {
    sqlx::query_as::<_, Property>("SELECT * FROM properties WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(HandReceiptError::from)
}

async fn lock_property_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
) -> Result<Option<Property>, HandReceiptError> {
    sqlx::query_as::<_, Property>("SELECT * FROM properties WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(HandReceiptError::from)
}

#[async_trait]
impl Repository for PgRepository {
    async fn create_user(&self, input: CreateUserInput) -> Result<User, HandReceiptError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, name, rank, unit, role, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'Active')
            RETURNING *
            "#,
        )
        .bind(&input.username)
        .bind(&input.password_hash)
        .bind(&input.name)
        .bind(&input.rank)
        .bind(&input.unit)
        .bind(&input.role)
        .fetch_one(&self.pool)
        .await
        .map_err(HandReceiptError::from)
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, HandReceiptError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(HandReceiptError::from)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, HandReceiptError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(username) = LOWER($1)")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(HandReceiptError::from)
    }

    async fn search_users(&self, query: &str, limit: i64) -> Result<Vec<User>, HandReceiptError> {
        let pattern = format!("%{}%", query.replace('%', "\\%"));
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE username ILIKE $1 OR name ILIKE $1 ORDER BY username LIMIT $2",
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(HandReceiptError::from)
    }

    async fn set_user_status(&self, id: i64, status: UserStatus) -> Result<User, HandReceiptError> {
        sqlx::query_as::<_, User>("UPDATE users SET status = $1 WHERE id = $2 RETURNING *")
            .bind(status)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(HandReceiptError::from)?
            .ok_or_else(|| HandReceiptError::UserNotFound(id.to_string()))
    }

    async fn create_property(
        &self,
        input: CreatePropertyInput,
        actor_user_id: i64,
    ) -> Result<(Property, LedgerEvent), HandReceiptError> {
        let serial = input.serial_number.clone();
        self.with_tx(move |tx| {
            let input = input.clone();
            Box::pin(async move {
                let existing: Option<(i64,)> =
                    sqlx::query_as("SELECT id FROM properties WHERE serial_number = $1")
                        .bind(&input.serial_number)
                        .fetch_optional(&mut **tx)
                        .await
                        .map_err(HandReceiptError::from)?;
                if let Some((existing_id,)) = existing {
                    return Err(HandReceiptError::SerialAlreadyExists {
                        serial: input.serial_number.clone(),
                        existing_id,
                    });
                }

                let property = sqlx::query_as::<_, Property>(
                    r#"
                    INSERT INTO properties
                        (name, serial_number, nsn, lin, description, current_status, assigned_to_user_id, property_model_id)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    RETURNING *
                    "#,
                )
                .bind(&input.name)
                .bind(&input.serial_number)
                .bind(&input.nsn)
                .bind(&input.lin)
                .bind(&input.description)
                .bind(input.current_status)
                .bind(input.assigned_to_user_id)
                .bind(input.property_model_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(HandReceiptError::from)?;

                let payload = serde_json::json!({
                    "name": property.name,
                    "serialNumber": property.serial_number,
                    "assignedToUserId": property.assigned_to_user_id,
                });
                let event = append_ledger_event(
                    tx,
                    LedgerEventType::ItemCreate,
                    property.id,
                    actor_user_id,
                    payload,
                )
                .await?;

                Ok((property, event))
            })
        })
        .await
        .map_err(|err| match err {
            HandReceiptError::InvalidInput(msg) if msg.contains("uniqueness violation") => {
                HandReceiptError::SerialAlreadyExists {
                    serial: serial.clone(),
                    existing_id: 0,
                }
            }
            other => other,
        })
    }

    async fn get_property_by_id(&self, id: i64) -> Result<Option<Property>, HandReceiptError> {
        fetch_property(&self.pool, id).await
    }

    async fn get_property_by_serial(
        &self,
        serial: &str,
    ) -> Result<Option<Property>, HandReceiptError> {
        sqlx::query_as::<_, Property>("SELECT * FROM properties WHERE serial_number = $1")
            .bind(serial)
            .fetch_optional(&self.pool)
            .await
            .map_err(HandReceiptError::from)
    }

    async fn list_properties(
        &self,
        filters: PropertyFilters,
    ) -> Result<Vec<Property>, HandReceiptError> {
        let mut query = String::from("SELECT * FROM properties WHERE 1 = 1");
        let mut idx = 1;
        if filters.assigned_to_user_id.is_some() {
            query.push_str(&format!(" AND assigned_to_user_id = ${idx}"));
            idx += 1;
        }
        if filters.status.is_some() {
            query.push_str(&format!(" AND current_status = ${idx}"));
            idx += 1;
        }
        if filters.category.is_some() {
            query.push_str(&format!(" AND name ILIKE ${idx}"));
            idx += 1;
        }
        query.push_str(&format!(" ORDER BY id LIMIT ${idx} OFFSET ${}", idx + 1));

        let mut q = sqlx::query_as::<_, Property>(&query);
        if let Some(uid) = filters.assigned_to_user_id {
            q = q.bind(uid);
        }
        if let Some(status) = filters.status {
            q = q.bind(status);
        }
        if let Some(category) = filters.category {
            q = q.bind(format!("%{category}%"));
        }
        q = q.bind(filters.limit).bind(filters.offset);

        q.fetch_all(&self.pool).await.map_err(HandReceiptError::from)
    }

    async fn update_property_status(
        &self,
        property_id: i64,
        new_status: PropertyStatus,
        actor_user_id: i64,
        note: Option<String>,
    ) -> Result<(Property, LedgerEvent), HandReceiptError> {
        self.with_tx(move |tx| {
            let note = note.clone();
            Box::pin(async move {
                let property = lock_property_for_update(tx, property_id)
                    .await?
                    .ok_or_else(|| HandReceiptError::PropertyNotFound(property_id.to_string()))?;

                let updated = sqlx::query_as::<_, Property>(
                    "UPDATE properties SET current_status = $1, updated_at = now() WHERE id = $2 RETURNING *",
                )
                .bind(new_status)
                .bind(property_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(HandReceiptError::from)?;

                if matches!(new_status, PropertyStatus::Lost) {
                    sqlx::query(
                        "UPDATE qr_codes SET is_active = false, deactivated_reason = 'property_lost', deactivated_at = now() WHERE inventory_item_id = $1 AND is_active",
                    )
                    .bind(property_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(HandReceiptError::from)?;
                }

                let payload = serde_json::json!({
                    "from": property.current_status,
                    "to": new_status,
                    "note": note,
                });
                let event = append_ledger_event(
                    tx,
                    LedgerEventType::StatusChange,
                    property_id,
                    actor_user_id,
                    payload,
                )
                .await?;

                Ok((updated, event))
            })
        })
        .await
    }

    async fn generate_qr_code(
        &self,
        new_qr: NewQrCode,
    ) -> Result<(QRCode, Vec<LedgerEvent>), HandReceiptError> {
        self.with_tx(move |tx| {
            let new_qr = new_qr.clone();
            Box::pin(async move {
                let mut events = Vec::new();

                let previous = sqlx::query_as::<_, QRCode>(
                    "SELECT * FROM qr_codes WHERE inventory_item_id = $1 AND is_active FOR UPDATE",
                )
                .bind(new_qr.property_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(HandReceiptError::from)?;

                if let Some(previous) = previous {
                    sqlx::query(
                        "UPDATE qr_codes SET is_active = false, deactivated_reason = 'superseded', deactivated_at = now() WHERE id = $1",
                    )
                    .bind(previous.id)
                    .execute(&mut **tx)
                    .await
                    .map_err(HandReceiptError::from)?;

                    let event = append_ledger_event(
                        tx,
                        LedgerEventType::QrDeactivated,
                        new_qr.property_id,
                        new_qr.generated_by_user_id,
                        serde_json::json!({"qrId": previous.id, "reason": "superseded"}),
                    )
                    .await?;
                    events.push(event);
                }

                let existing_hash: Option<(i64,)> =
                    sqlx::query_as("SELECT id FROM qr_codes WHERE qr_code_hash = $1")
                        .bind(&new_qr.qr_code_hash)
                        .fetch_optional(&mut **tx)
                        .await
                        .map_err(HandReceiptError::from)?;
                if existing_hash.is_some() {
                    return Err(HandReceiptError::QRHashCollision);
                }

                let qr = sqlx::query_as::<_, QRCode>(
                    r#"
                    INSERT INTO qr_codes (inventory_item_id, qr_code_hash, payload_json, generated_by_user_id, generated_at, is_active)
                    VALUES ($1, $2, $3, $4, $5, true)
                    RETURNING *
                    "#,
                )
                .bind(new_qr.property_id)
                .bind(&new_qr.qr_code_hash)
                .bind(&new_qr.payload_json)
                .bind(new_qr.generated_by_user_id)
                .bind(new_qr.generated_at)
                .fetch_one(&mut **tx)
                .await
                .map_err(HandReceiptError::from)?;

                let event = append_ledger_event(
                    tx,
                    LedgerEventType::QrGenerated,
                    new_qr.property_id,
                    new_qr.generated_by_user_id,
                    serde_json::json!({"qrId": qr.id, "qrHash": qr.qr_code_hash}),
                )
                .await?;
                events.push(event);

                Ok((qr, events))
            })
        })
        .await
    }

    async fn get_active_qr_for_property(
        &self,
        property_id: i64,
    ) -> Result<Option<QRCode>, HandReceiptError> {
        sqlx::query_as::<_, QRCode>(
            "SELECT * FROM qr_codes WHERE inventory_item_id = $1 AND is_active",
        )
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(HandReceiptError::from)
    }

    async fn get_qr_by_hash(&self, hash: &str) -> Result<Option<QRCode>, HandReceiptError> {
        sqlx::query_as::<_, QRCode>("SELECT * FROM qr_codes WHERE qr_code_hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(HandReceiptError::from)
    }

    async fn get_qr_by_id(&self, id: i64) -> Result<Option<QRCode>, HandReceiptError> {
        sqlx::query_as::<_, QRCode>("SELECT * FROM qr_codes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(HandReceiptError::from)
    }

    async fn list_qr_codes(&self, property_id: Option<i64>) -> Result<Vec<QRCode>, HandReceiptError> {
        match property_id {
            Some(id) => sqlx::query_as::<_, QRCode>(
                "SELECT * FROM qr_codes WHERE inventory_item_id = $1 ORDER BY id DESC",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(HandReceiptError::from),
            None => sqlx::query_as::<_, QRCode>("SELECT * FROM qr_codes ORDER BY id DESC LIMIT 200")
                .fetch_all(&self.pool)
                .await
                .map_err(HandReceiptError::from),
        }
    }

    async fn deactivate_qr_code(
        &self,
        qr_id: i64,
        actor_user_id: i64,
        reason: &str,
    ) -> Result<(QRCode, LedgerEvent), HandReceiptError> {
        let reason = reason.to_string();
        self.with_tx(move |tx| {
            let reason = reason.clone();
            Box::pin(async move {
                let qr = sqlx::query_as::<_, QRCode>("SELECT * FROM qr_codes WHERE id = $1 FOR UPDATE")
                    .bind(qr_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(HandReceiptError::from)?
                    .ok_or_else(|| HandReceiptError::QRNotFound(qr_id.to_string()))?;

                let updated = sqlx::query_as::<_, QRCode>(
                    "UPDATE qr_codes SET is_active = false, deactivated_reason = $1, deactivated_at = now() WHERE id = $2 RETURNING *",
                )
                .bind(&reason)
                .bind(qr_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(HandReceiptError::from)?;

                let event = append_ledger_event(
                    tx,
                    LedgerEventType::QrDeactivated,
                    qr.inventory_item_id,
                    actor_user_id,
                    serde_json::json!({"qrId": qr_id, "reason": reason}),
                )
                .await?;

                Ok((updated, event))
            })
        })
        .await
    }

    async fn create_transfer(
        &self,
        property_id: i64,
        from_user_id: i64,
        to_user_id: i64,
        initiating_qr_code_id: Option<i64>,
        actor_user_id: i64,
    ) -> Result<(Transfer, LedgerEvent), HandReceiptError> {
        self.with_tx(move |tx| {
            Box::pin(async move {
                let property = lock_property_for_update(tx, property_id)
                    .await?
                    .ok_or_else(|| HandReceiptError::PropertyNotFound(property_id.to_string()))?;

                if property.assigned_to_user_id != Some(from_user_id) {
                    return Err(HandReceiptError::OwnershipChanged);
                }

                let pending: Option<(i64,)> = sqlx::query_as(
                    "SELECT id FROM transfers WHERE property_id = $1 AND status = 'Requested'",
                )
                .bind(property_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(HandReceiptError::from)?;
                if pending.is_some() {
                    return Err(HandReceiptError::TransferAlreadyPending);
                }

                let transfer = sqlx::query_as::<_, Transfer>(
                    r#"
                    INSERT INTO transfers (property_id, from_user_id, to_user_id, status, initiating_qr_code_id)
                    VALUES ($1, $2, $3, 'Requested', $4)
                    RETURNING *
                    "#,
                )
                .bind(property_id)
                .bind(from_user_id)
                .bind(to_user_id)
                .bind(initiating_qr_code_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| match &e {
                    sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                        HandReceiptError::TransferAlreadyPending
                    }
                    _ => HandReceiptError::from(e),
                })?;

                let event = append_ledger_event(
                    tx,
                    LedgerEventType::TransferRequest,
                    property_id,
                    actor_user_id,
                    serde_json::json!({
                        "transferId": transfer.id,
                        "fromUserId": from_user_id,
                        "toUserId": to_user_id,
                    }),
                )
                .await?;

                Ok((transfer, event))
            })
        })
        .await
    }

    async fn get_transfer_by_id(&self, id: i64) -> Result<Option<Transfer>, HandReceiptError> {
        sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(HandReceiptError::from)
    }

    async fn get_pending_transfer_for_property(
        &self,
        property_id: i64,
    ) -> Result<Option<Transfer>, HandReceiptError> {
        sqlx::query_as::<_, Transfer>(
            "SELECT * FROM transfers WHERE property_id = $1 AND status = 'Requested'",
        )
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(HandReceiptError::from)
    }

    async fn list_transfers(
        &self,
        user_id: i64,
        status: Option<Vec<TransferStatus>>,
        direction: TransferDirection,
    ) -> Result<Vec<Transfer>, HandReceiptError> {
        let direction_clause = match direction {
            TransferDirection::Incoming => "to_user_id = $1",
            TransferDirection::Outgoing => "from_user_id = $1",
            TransferDirection::All => "(to_user_id = $1 OR from_user_id = $1)",
        };
        let statuses: Vec<TransferStatus> =
            status.unwrap_or_else(|| vec![TransferStatus::Requested]);
        let status_strs: Vec<&'static str> = statuses
            .iter()
            .map(|s| match s {
                TransferStatus::Requested => "Requested",
                TransferStatus::Approved => "Approved",
                TransferStatus::Rejected => "Rejected",
                TransferStatus::Cancelled => "Cancelled",
            })
            .collect();

        let query = format!(
            "SELECT * FROM transfers WHERE {direction_clause} AND status = ANY($2) ORDER BY request_timestamp DESC"
        );
        sqlx::query_as::<_, Transfer>(&query)
            .bind(user_id)
            .bind(&status_strs)
            .fetch_all(&self.pool)
            .await
            .map_err(HandReceiptError::from)
    }

    async fn resolve_transfer(
        &self,
        transfer_id: i64,
        decision: ResolveDecision,
        actor_user_id: i64,
        notes: Option<String>,
    ) -> Result<(Transfer, Vec<LedgerEvent>), HandReceiptError> {
        self.with_tx(move |tx| {
            let notes = notes.clone();
            Box::pin(async move {
                let mut events = Vec::new();

                let transfer = sqlx::query_as::<_, Transfer>(
                    "SELECT * FROM transfers WHERE id = $1 FOR UPDATE",
                )
                .bind(transfer_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(HandReceiptError::from)?
                .ok_or_else(|| HandReceiptError::TransferNotFound(transfer_id.to_string()))?;

                if transfer.status != TransferStatus::Requested {
                    return Err(HandReceiptError::TransferNotPending);
                }

                let target_status = decision.target_status();
                let updated = sqlx::query_as::<_, Transfer>(
                    "UPDATE transfers SET status = $1, resolution_timestamp = now(), notes = $2 WHERE id = $3 RETURNING *",
                )
                .bind(target_status)
                .bind(&notes)
                .bind(transfer_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(HandReceiptError::from)?;

                if matches!(decision, ResolveDecision::Approved) {
                    let property = lock_property_for_update(tx, transfer.property_id)
                        .await?
                        .ok_or_else(|| {
                            HandReceiptError::PropertyNotFound(transfer.property_id.to_string())
                        })?;

                    if property.assigned_to_user_id != Some(transfer.from_user_id) {
                        return Err(HandReceiptError::OwnershipChanged);
                    }

                    sqlx::query(
                        "UPDATE properties SET assigned_to_user_id = $1, updated_at = now() WHERE id = $2",
                    )
                    .bind(transfer.to_user_id)
                    .bind(transfer.property_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(HandReceiptError::from)?;

                    let active_qr = sqlx::query_as::<_, QRCode>(
                        "SELECT * FROM qr_codes WHERE inventory_item_id = $1 AND is_active FOR UPDATE",
                    )
                    .bind(transfer.property_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(HandReceiptError::from)?;

                    if let Some(qr) = active_qr {
                        sqlx::query(
                            "UPDATE qr_codes SET is_active = false, deactivated_reason = 'ownership_change', deactivated_at = now() WHERE id = $1",
                        )
                        .bind(qr.id)
                        .execute(&mut **tx)
                        .await
                        .map_err(HandReceiptError::from)?;

                        let event = append_ledger_event(
                            tx,
                            LedgerEventType::QrDeactivated,
                            transfer.property_id,
                            actor_user_id,
                            serde_json::json!({"qrId": qr.id, "reason": "ownership_change"}),
                        )
                        .await?;
                        events.push(event);
                    }
                }

                let event = append_ledger_event(
                    tx,
                    decision.ledger_event_type(),
                    transfer.property_id,
                    actor_user_id,
                    serde_json::json!({
                        "transferId": transfer.id,
                        "notes": notes,
                    }),
                )
                .await?;
                events.push(event);

                Ok((updated, events))
            })
        })
        .await
    }

    async fn append_correction(
        &self,
        property_id: i64,
        actor_user_id: i64,
        payload: Value,
    ) -> Result<LedgerEvent, HandReceiptError> {
        self.with_tx(move |tx| {
            let payload = payload.clone();
            Box::pin(async move {
                append_ledger_event(
                    tx,
                    LedgerEventType::Correction,
                    property_id,
                    actor_user_id,
                    payload,
                )
                .await
            })
        })
        .await
    }

    async fn ledger_history(
        &self,
        property_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEvent>, HandReceiptError> {
        sqlx::query_as::<_, LedgerEvent>(
            "SELECT * FROM ledger_events WHERE property_id = $1 ORDER BY sequence ASC LIMIT $2 OFFSET $3",
        )
        .bind(property_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(HandReceiptError::from)
    }

    async fn ledger_verify(
        &self,
        from_sequence: i64,
        to_sequence: i64,
    ) -> Result<crate::ledger::VerificationReport, HandReceiptError> {
        let rows = sqlx::query_as::<_, LedgerEvent>(
            "SELECT * FROM ledger_events WHERE sequence BETWEEN $1 AND $2 ORDER BY sequence ASC",
        )
        .bind(from_sequence)
        .bind(to_sequence)
        .fetch_all(&self.pool)
        .await
        .map_err(HandReceiptError::from)?;

        let pure_entries: Vec<PureLedgerEntry> = rows
            .into_iter()
            .map(|e| PureLedgerEntry {
                sequence: e.sequence,
                event_type: e.event_type,
                property_id: e.property_id,
                actor_user_id: e.actor_user_id,
                payload: e.payload,
                prev_hash: e.prev_hash,
                hash: e.hash,
                created_at: e.created_at,
            })
            .collect();

        if from_sequence == 1 {
            Ok(verify_chain(&pure_entries))
        } else {
            // Mid-range verification only checks internal consistency; the
            // link to sequence `from_sequence - 1` is checked by whoever
            // holds that earlier event, matching spec's range-scoped
            // `Verify(fromSequence, toSequence)` contract.
            let report = verify_chain_from(&pure_entries);
            Ok(report)
        }
    }

    async fn create_session(
        &self,
        user_id: i64,
        expires_at: DateTime<Utc>,
        refresh_token_id: Option<uuid::Uuid>,
        refresh_token_hash: Option<String>,
    ) -> Result<Session, HandReceiptError> {
        sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, expires_at, refresh_token_id, refresh_token_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(user_id)
        .bind(expires_at)
        .bind(refresh_token_id)
        .bind(refresh_token_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(HandReceiptError::from)
    }

    async fn get_session(&self, id: uuid::Uuid) -> Result<Option<Session>, HandReceiptError> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(HandReceiptError::from)
    }

    async fn touch_session(&self, id: uuid::Uuid) -> Result<(), HandReceiptError> {
        sqlx::query("UPDATE sessions SET last_seen_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(HandReceiptError::from)?;
        Ok(())
    }

    async fn revoke_session(&self, id: uuid::Uuid) -> Result<(), HandReceiptError> {
        sqlx::query("UPDATE sessions SET is_revoked = true WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(HandReceiptError::from)?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        id: uuid::Uuid,
        refresh_token_id: uuid::Uuid,
        refresh_token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, HandReceiptError> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET refresh_token_id = $1, refresh_token_hash = $2, expires_at = $3, last_seen_at = now()
            WHERE id = $4 AND NOT is_revoked
            RETURNING *
            "#,
        )
        .bind(refresh_token_id)
        .bind(refresh_token_hash)
        .bind(expires_at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(HandReceiptError::from)?
        .ok_or(HandReceiptError::SessionRevoked)
    }

    async fn delete_sessions_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, HandReceiptError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(HandReceiptError::from)?;
        Ok(result.rows_affected())
    }
}

/// Verify internal consistency of a contiguous sub-range whose first
/// entry's `prevHash` is trusted as given (not re-derived from genesis).
fn verify_chain_from(entries: &[PureLedgerEntry]) -> crate::ledger::VerificationReport {
    let mut expected_prev = match entries.first() {
        Some(first) => first.prev_hash.clone(),
        None => genesis_hash(),
    };
    for entry in entries {
        if entry.prev_hash != expected_prev {
            return crate::ledger::VerificationReport {
                ok: false,
                first_broken_at: Some(entry.sequence),
            };
        }
        expected_prev = entry.hash.clone();
    }
    crate::ledger::VerificationReport {
        ok: true,
        first_broken_at: None,
    }
}
