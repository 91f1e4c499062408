use crate::middleware::AuthUser;
use crate::{ApiError, ServiceState};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use handreceipt_core::repository::{CreatePropertyInput, PropertyFilters};
use handreceipt_core::types::{LedgerEvent, Property, PropertyStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreatePropertyRequest {
    pub name: String,
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
    pub nsn: Option<String>,
    pub lin: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "currentStatus")]
    pub current_status: Option<String>,
    #[serde(rename = "assignedToUserId")]
    pub assigned_to_user_id: Option<i64>,
    #[serde(rename = "propertyModelId")]
    pub property_model_id: Option<i64>,
}

pub async fn create(
    State(state): State<ServiceState>,
    user: AuthUser,
    Json(request): Json<CreatePropertyRequest>,
) -> Result<(StatusCode, Json<Property>), ApiError> {
    let current_status = match request.current_status.as_deref() {
        Some(raw) => PropertyStatus::parse(raw).ok_or_else(|| {
            ApiError::from(handreceipt_core::error::HandReceiptError::InvalidInput(format!(
                "unrecognized currentStatus: {raw}"
            )))
        })?,
        None => PropertyStatus::Operational,
    };

    let property = state
        .property_service
        .create(
            CreatePropertyInput {
                name: request.name,
                serial_number: request.serial_number,
                nsn: request.nsn,
                lin: request.lin,
                description: request.description,
                current_status,
                assigned_to_user_id: request.assigned_to_user_id.or(Some(user.user_id)),
                property_model_id: request.property_model_id,
            },
            user.user_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(property)))
}

pub async fn get_by_id(
    State(state): State<ServiceState>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Property>, ApiError> {
    Ok(Json(state.property_service.get_by_id(id).await?))
}

pub async fn get_by_serial(
    State(state): State<ServiceState>,
    _user: AuthUser,
    Path(serial): Path<String>,
) -> Result<Json<Property>, ApiError> {
    Ok(Json(state.property_service.get_by_serial(&serial).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListPropertiesQuery {
    #[serde(rename = "assignedToUserId")]
    pub assigned_to_user_id: Option<i64>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub total: usize,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub meta: Meta,
}

pub async fn list(
    State(state): State<ServiceState>,
    user: AuthUser,
    Query(query): Query<ListPropertiesQuery>,
) -> Result<Json<ListResponse<Property>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(PropertyStatus::parse(raw).ok_or_else(|| {
            ApiError::from(handreceipt_core::error::HandReceiptError::InvalidInput(format!(
                "unrecognized status filter: {raw}"
            )))
        })?),
        None => None,
    };
    let filters = PropertyFilters {
        assigned_to_user_id: Some(query.assigned_to_user_id.unwrap_or(user.user_id)),
        status,
        category: query.category,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };
    let items = state.property_service.list(filters.clone()).await?;
    Ok(Json(ListResponse {
        meta: Meta {
            total: items.len(),
            limit: filters.limit,
            offset: filters.offset,
        },
        data: items,
    }))
}

pub async fn history(
    State(state): State<ServiceState>,
    _user: AuthUser,
    Path(serial): Path<String>,
) -> Result<Json<Vec<LedgerEvent>>, ApiError> {
    let property = state.property_service.get_by_serial(&serial).await?;
    let events = state.repository.ledger_history(property.id, 500, 0).await?;
    Ok(Json(events))
}
