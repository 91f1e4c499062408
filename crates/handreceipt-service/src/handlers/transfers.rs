use crate::middleware::AuthUser;
use crate::{ApiError, ServiceState};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use handreceipt_core::error::HandReceiptError;
use handreceipt_core::qr::QrPayload;
use handreceipt_core::repository::ResolveDecision;
use handreceipt_core::types::{Transfer, TransferDirection, TransferStatus};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RequestManualRequest {
    #[serde(rename = "propertyId")]
    pub property_id: i64,
    #[serde(rename = "recipientUserId")]
    pub recipient_user_id: i64,
}

pub async fn request_manual(
    State(state): State<ServiceState>,
    user: AuthUser,
    Json(request): Json<RequestManualRequest>,
) -> Result<Json<Transfer>, ApiError> {
    let transfer = state
        .transfer_service
        .request_manual(request.property_id, request.recipient_user_id, user.user_id)
        .await?;
    Ok(Json(transfer))
}

#[derive(Debug, Deserialize)]
pub struct RequestByQrRequest {
    pub payload: QrPayload,
    #[serde(rename = "scannedAt")]
    pub scanned_at: Option<chrono::DateTime<Utc>>,
}

pub async fn request_by_qr(
    State(state): State<ServiceState>,
    user: AuthUser,
    Json(request): Json<RequestByQrRequest>,
) -> Result<Json<Transfer>, ApiError> {
    let scanned_at = request.scanned_at.unwrap_or_else(Utc::now);
    let transfer = state
        .transfer_service
        .request_by_qr(&request.payload, scanned_at, user.user_id)
        .await?;
    Ok(Json(transfer))
}

pub async fn get_by_id(
    State(state): State<ServiceState>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Transfer>, ApiError> {
    Ok(Json(state.transfer_service.get_by_id(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListTransfersQuery {
    pub status: Option<String>,
    pub direction: Option<String>,
}

fn parse_status_filter(raw: &str) -> Result<TransferStatus, ApiError> {
    match raw {
        "Requested" => Ok(TransferStatus::Requested),
        "Approved" => Ok(TransferStatus::Approved),
        "Rejected" => Ok(TransferStatus::Rejected),
        "Cancelled" => Ok(TransferStatus::Cancelled),
        other => Err(ApiError::from(HandReceiptError::InvalidInput(format!(
            "unrecognized transfer status: {other}"
        )))),
    }
}

pub async fn list(
    State(state): State<ServiceState>,
    user: AuthUser,
    Query(query): Query<ListTransfersQuery>,
) -> Result<Json<Vec<Transfer>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|raw| raw.split(',').map(parse_status_filter).collect::<Result<Vec<_>, _>>())
        .transpose()?;
    let direction = match query.direction.as_deref() {
        Some("incoming") => TransferDirection::Incoming,
        Some("outgoing") => TransferDirection::Outgoing,
        _ => TransferDirection::All,
    };
    let transfers = state.transfer_service.list(user.user_id, status, direction).await?;
    Ok(Json(transfers))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DecisionRequest {
    Approved,
    Rejected,
    Cancelled,
}

impl From<DecisionRequest> for ResolveDecision {
    fn from(value: DecisionRequest) -> Self {
        match value {
            DecisionRequest::Approved => ResolveDecision::Approved,
            DecisionRequest::Rejected => ResolveDecision::Rejected,
            DecisionRequest::Cancelled => ResolveDecision::Cancelled,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveTransferRequest {
    #[serde(rename = "status")]
    pub decision: DecisionRequest,
    pub notes: Option<String>,
}

pub async fn resolve(
    State(state): State<ServiceState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(request): Json<ResolveTransferRequest>,
) -> Result<Json<Transfer>, ApiError> {
    let transfer = state
        .transfer_service
        .resolve(id, request.decision.into(), user.user_id, request.notes)
        .await?;
    Ok(Json(transfer))
}
