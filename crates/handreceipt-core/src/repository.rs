//! The repository capability interface (C2): the sole gateway to the
//! relational store. Business logic in [`crate::property`],
//! [`crate::transfer`], and [`crate::qr`] is programmed against this trait,
//! not against `sqlx` directly, so tests can supply
//! [`crate::repository::memory::MemoryRepository`] instead of a live
//! Postgres instance — the same "capability interface" shape the grounding
//! project uses for its `SettlementConnector`/ledger abstractions.

pub mod memory;
pub mod postgres;

use crate::error::HandReceiptError;
use crate::types::{
    LedgerEvent, LedgerEventType, Property, PropertyStatus, QRCode, Session, Transfer,
    TransferDirection, TransferStatus, User, UserStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CreatePropertyInput {
    pub name: String,
    pub serial_number: String,
    pub nsn: Option<String>,
    pub lin: Option<String>,
    pub description: Option<String>,
    pub current_status: PropertyStatus,
    pub assigned_to_user_id: Option<i64>,
    pub property_model_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PropertyFilters {
    pub assigned_to_user_id: Option<i64>,
    pub status: Option<PropertyStatus>,
    pub category: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for PropertyFilters {
    fn default() -> Self {
        Self {
            assigned_to_user_id: None,
            status: None,
            category: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveDecision {
    Approved,
    Rejected,
    Cancelled,
}

impl ResolveDecision {
    pub fn target_status(self) -> TransferStatus {
        match self {
            Self::Approved => TransferStatus::Approved,
            Self::Rejected => TransferStatus::Rejected,
            Self::Cancelled => TransferStatus::Cancelled,
        }
    }

    pub fn ledger_event_type(self) -> LedgerEventType {
        match self {
            Self::Approved => LedgerEventType::TransferApproved,
            Self::Rejected => LedgerEventType::TransferRejected,
            Self::Cancelled => LedgerEventType::TransferCancelled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub username: String,
    pub password_hash: String,
    pub name: String,
    pub rank: String,
    pub unit: String,
    pub role: crate::types::Role,
}

#[derive(Debug, Clone)]
pub struct NewQrCode {
    pub property_id: i64,
    pub qr_code_hash: String,
    pub payload_json: Value,
    pub generated_by_user_id: i64,
    pub generated_at: DateTime<Utc>,
}

/// Sole gateway to the relational store. Every method here either is a
/// single statement or wraps its multi-row work in one transaction,
/// enforcing the invariants from spec §3/§4.2 at this layer, not in
/// callers: unique serial numbers, unique QR hashes, at most one active QR
/// per property, and at most one `Requested` transfer per property.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn create_user(&self, input: CreateUserInput) -> Result<User, HandReceiptError>;
    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, HandReceiptError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, HandReceiptError>;
    async fn search_users(&self, query: &str, limit: i64) -> Result<Vec<User>, HandReceiptError>;
    async fn set_user_status(
        &self,
        id: i64,
        status: UserStatus,
    ) -> Result<User, HandReceiptError>;

    // --- Property ---
    /// Inserts the property and appends `ITEM_CREATE` in one transaction.
    async fn create_property(
        &self,
        input: CreatePropertyInput,
        actor_user_id: i64,
    ) -> Result<(Property, LedgerEvent), HandReceiptError>;
    async fn get_property_by_id(&self, id: i64) -> Result<Option<Property>, HandReceiptError>;
    async fn get_property_by_serial(
        &self,
        serial: &str,
    ) -> Result<Option<Property>, HandReceiptError>;
    async fn list_properties(
        &self,
        filters: PropertyFilters,
    ) -> Result<Vec<Property>, HandReceiptError>;
    /// Free-form status change (except `Lost`, which is irreversible without
    /// a `CORRECTION` event), appends `STATUS_CHANGE`.
    async fn update_property_status(
        &self,
        property_id: i64,
        new_status: PropertyStatus,
        actor_user_id: i64,
        note: Option<String>,
    ) -> Result<(Property, LedgerEvent), HandReceiptError>;

    // --- QR codes ---
    /// Deactivates any current active QR (emitting `QR_DEACTIVATED`),
    /// inserts `new_qr`, and emits `QR_GENERATED`, all in one transaction.
    async fn generate_qr_code(
        &self,
        new_qr: NewQrCode,
    ) -> Result<(QRCode, Vec<LedgerEvent>), HandReceiptError>;
    async fn get_active_qr_for_property(
        &self,
        property_id: i64,
    ) -> Result<Option<QRCode>, HandReceiptError>;
    async fn get_qr_by_hash(&self, hash: &str) -> Result<Option<QRCode>, HandReceiptError>;
    async fn get_qr_by_id(&self, id: i64) -> Result<Option<QRCode>, HandReceiptError>;
    async fn list_qr_codes(&self, property_id: Option<i64>) -> Result<Vec<QRCode>, HandReceiptError>;
    async fn deactivate_qr_code(
        &self,
        qr_id: i64,
        actor_user_id: i64,
        reason: &str,
    ) -> Result<(QRCode, LedgerEvent), HandReceiptError>;

    // --- Transfers ---
    /// Re-reads the property, rejects if a `Requested` transfer already
    /// exists (enforced by the partial unique index), inserts the new
    /// transfer row, and appends `TRANSFER_REQUEST` — all atomically.
    async fn create_transfer(
        &self,
        property_id: i64,
        from_user_id: i64,
        to_user_id: i64,
        initiating_qr_code_id: Option<i64>,
        actor_user_id: i64,
    ) -> Result<(Transfer, LedgerEvent), HandReceiptError>;
    async fn get_transfer_by_id(&self, id: i64) -> Result<Option<Transfer>, HandReceiptError>;
    async fn get_pending_transfer_for_property(
        &self,
        property_id: i64,
    ) -> Result<Option<Transfer>, HandReceiptError>;
    async fn list_transfers(
        &self,
        user_id: i64,
        status: Option<Vec<TransferStatus>>,
        direction: TransferDirection,
    ) -> Result<Vec<Transfer>, HandReceiptError>;
    /// Resolves a pending transfer. On `Approved`: re-asserts
    /// `assignedToUserId == fromUserId` (else `OwnershipChanged`), rebinds
    /// ownership, deactivates any active QR, and emits both
    /// `QR_DEACTIVATED` and `TRANSFER_APPROVED`. On `Rejected`/`Cancelled`:
    /// emits the matching event only. All in one transaction.
    async fn resolve_transfer(
        &self,
        transfer_id: i64,
        decision: ResolveDecision,
        actor_user_id: i64,
        notes: Option<String>,
    ) -> Result<(Transfer, Vec<LedgerEvent>), HandReceiptError>;

    // --- Ledger ---
    async fn append_correction(
        &self,
        property_id: i64,
        actor_user_id: i64,
        payload: Value,
    ) -> Result<LedgerEvent, HandReceiptError>;
    async fn ledger_history(
        &self,
        property_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEvent>, HandReceiptError>;
    async fn ledger_verify(
        &self,
        from_sequence: i64,
        to_sequence: i64,
    ) -> Result<crate::ledger::VerificationReport, HandReceiptError>;

    // --- Sessions ---
    async fn create_session(
        &self,
        user_id: i64,
        expires_at: DateTime<Utc>,
        refresh_token_id: Option<uuid::Uuid>,
        refresh_token_hash: Option<String>,
    ) -> Result<Session, HandReceiptError>;
    async fn get_session(&self, id: uuid::Uuid) -> Result<Option<Session>, HandReceiptError>;
    async fn touch_session(&self, id: uuid::Uuid) -> Result<(), HandReceiptError>;
    async fn revoke_session(&self, id: uuid::Uuid) -> Result<(), HandReceiptError>;
    async fn rotate_refresh_token(
        &self,
        id: uuid::Uuid,
        refresh_token_id: uuid::Uuid,
        refresh_token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, HandReceiptError>;
    async fn delete_sessions_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, HandReceiptError>;
}
