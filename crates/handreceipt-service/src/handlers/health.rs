use crate::ServiceState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    environment: String,
}

pub async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "handreceipt-service",
        environment: state.config.server_environment.clone(),
    })
}
