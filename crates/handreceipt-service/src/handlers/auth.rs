use crate::middleware::AuthUser;
use crate::{ApiError, ServiceState};
use axum::extract::{Query, State};
use axum::Json;
use handreceipt_core::error::HandReceiptError;
use handreceipt_core::types::User;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    pub user: User,
}

pub async fn login(
    State(state): State<ServiceState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let result = state.auth_service.login(&request.username, &request.password).await?;
    Ok(Json(LoginResponse {
        access_token: result.tokens.access_token,
        refresh_token: result.tokens.refresh_token,
        user: result.user,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
}

pub async fn refresh(
    State(state): State<ServiceState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let tokens = state.auth_service.refresh(&request.refresh_token).await?;
    Ok(Json(RefreshResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}

pub async fn logout(
    State(state): State<ServiceState>,
    user: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.auth_service.logout(user.session_id).await?;
    Ok(Json(serde_json::json!({ "status": "logged_out" })))
}

pub async fn me(State(state): State<ServiceState>, user: AuthUser) -> Result<Json<User>, ApiError> {
    let record = state
        .repository
        .get_user_by_id(user.user_id)
        .await?
        .ok_or_else(|| HandReceiptError::UserNotFound(user.user_id.to_string()))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct SearchUsersQuery {
    pub search: String,
}

pub async fn search_users(
    State(state): State<ServiceState>,
    _user: AuthUser,
    Query(query): Query<SearchUsersQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    if query.search.trim().chars().count() < 2 {
        return Err(ApiError::from(HandReceiptError::InvalidInput(
            "search query must be at least 2 characters".to_string(),
        )));
    }
    let results = state.repository.search_users(query.search.trim(), 25).await?;
    Ok(Json(results))
}
