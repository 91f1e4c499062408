//! Data model: users, property, QR codes, transfers, ledger events, sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum Role {
    Soldier,
    NCO,
    Officer,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum UserStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub rank: String,
    pub unit: String,
    pub role: Role,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum PropertyStatus {
    Operational,
    NonOperational,
    NeedsMaintenance,
    InRepair,
    Lost,
}

impl PropertyStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Operational" => Some(Self::Operational),
            "NonOperational" => Some(Self::NonOperational),
            "NeedsMaintenance" => Some(Self::NeedsMaintenance),
            "InRepair" => Some(Self::InRepair),
            "Lost" => Some(Self::Lost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: i64,
    pub name: String,
    pub serial_number: String,
    pub nsn: Option<String>,
    pub lin: Option<String>,
    pub description: Option<String>,
    pub current_status: PropertyStatus,
    pub assigned_to_user_id: Option<i64>,
    pub property_model_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QRCode {
    pub id: i64,
    pub inventory_item_id: i64,
    pub qr_code_hash: String,
    pub payload_json: Value,
    pub generated_by_user_id: i64,
    pub generated_at: DateTime<Utc>,
    pub is_active: bool,
    pub deactivated_reason: Option<String>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum TransferStatus {
    Requested,
    Approved,
    Rejected,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Requested)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TransferDirection {
    Incoming,
    Outgoing,
    All,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: i64,
    pub property_id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub status: TransferStatus,
    pub request_timestamp: DateTime<Utc>,
    pub resolution_timestamp: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub initiating_qr_code_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum LedgerEventType {
    #[sqlx(rename = "ITEM_CREATE")]
    #[serde(rename = "ITEM_CREATE")]
    ItemCreate,
    #[sqlx(rename = "QR_GENERATED")]
    #[serde(rename = "QR_GENERATED")]
    QrGenerated,
    #[sqlx(rename = "QR_DEACTIVATED")]
    #[serde(rename = "QR_DEACTIVATED")]
    QrDeactivated,
    #[sqlx(rename = "TRANSFER_REQUEST")]
    #[serde(rename = "TRANSFER_REQUEST")]
    TransferRequest,
    #[sqlx(rename = "TRANSFER_APPROVED")]
    #[serde(rename = "TRANSFER_APPROVED")]
    TransferApproved,
    #[sqlx(rename = "TRANSFER_REJECTED")]
    #[serde(rename = "TRANSFER_REJECTED")]
    TransferRejected,
    #[sqlx(rename = "TRANSFER_CANCELLED")]
    #[serde(rename = "TRANSFER_CANCELLED")]
    TransferCancelled,
    #[sqlx(rename = "STATUS_CHANGE")]
    #[serde(rename = "STATUS_CHANGE")]
    StatusChange,
    #[sqlx(rename = "CORRECTION")]
    #[serde(rename = "CORRECTION")]
    Correction,
}

impl LedgerEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ItemCreate => "ITEM_CREATE",
            Self::QrGenerated => "QR_GENERATED",
            Self::QrDeactivated => "QR_DEACTIVATED",
            Self::TransferRequest => "TRANSFER_REQUEST",
            Self::TransferApproved => "TRANSFER_APPROVED",
            Self::TransferRejected => "TRANSFER_REJECTED",
            Self::TransferCancelled => "TRANSFER_CANCELLED",
            Self::StatusChange => "STATUS_CHANGE",
            Self::Correction => "CORRECTION",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub sequence: i64,
    pub event_type: LedgerEventType,
    pub property_id: i64,
    pub actor_user_id: i64,
    pub payload: Value,
    pub prev_hash: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: uuid::Uuid,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refresh_token_id: Option<uuid::Uuid>,
    pub refresh_token_hash: Option<String>,
    pub is_revoked: bool,
}

/// Result of `QRCode::verify`, one variant per spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationResult {
    Valid,
    InvalidHash,
    NotFound,
    Deactivated,
    Outdated,
    PropertyLost,
}
