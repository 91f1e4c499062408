use crate::middleware::{require_role, AuthUser};
use crate::{ApiError, ServiceState};
use axum::extract::{Path, Query, State};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use handreceipt_core::error::HandReceiptError;
use handreceipt_core::qr::QrPayload;
use handreceipt_core::types::{Role, QRCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct GenerateQrResponse {
    pub payload: QrPayload,
    #[serde(rename = "pngBase64")]
    pub png_base64: String,
}

pub async fn generate(
    State(state): State<ServiceState>,
    user: AuthUser,
    Path(property_id): Path<i64>,
) -> Result<Json<GenerateQrResponse>, ApiError> {
    let (payload, png) = state.qr_engine.generate(property_id, user.user_id).await?;
    Ok(Json(GenerateQrResponse {
        payload,
        png_base64: BASE64.encode(png),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReportDamagedRequest {
    pub reason: String,
}

/// A QR may be marked damaged by the user who generated it or by an admin.
pub async fn report_damaged(
    State(state): State<ServiceState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(request): Json<ReportDamagedRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let qr = state
        .repository
        .get_qr_by_id(id)
        .await?
        .ok_or_else(|| ApiError::from(HandReceiptError::QRNotFound(id.to_string())))?;
    if qr.generated_by_user_id != user.user_id {
        require_role(&user, &[Role::Admin])?;
    }

    state
        .qr_engine
        .report_damaged(id, user.user_id, &request.reason)
        .await?;
    Ok(Json(serde_json::json!({ "status": "deactivated" })))
}

#[derive(Debug, Deserialize)]
pub struct ListQrQuery {
    #[serde(rename = "propertyId")]
    pub property_id: Option<i64>,
}

pub async fn list(
    State(state): State<ServiceState>,
    _user: AuthUser,
    Query(query): Query<ListQrQuery>,
) -> Result<Json<Vec<QRCode>>, ApiError> {
    Ok(Json(state.repository.list_qr_codes(query.property_id).await?))
}
