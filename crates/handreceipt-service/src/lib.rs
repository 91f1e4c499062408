#![deny(unsafe_code)]

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod scheduler;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use config::Config;
use handreceipt_adapters::{LocalFileStorage, OcrService, StorageService, UnconfiguredOcrService};
use handreceipt_core::auth::AuthConfig;
use handreceipt_core::auth::AuthService;
use handreceipt_core::error::HandReceiptError;
use handreceipt_core::property::PropertyService;
use handreceipt_core::qr::QrEngine;
use handreceipt_core::repository::postgres::PgRepository;
use handreceipt_core::repository::Repository;
use handreceipt_core::transfer::TransferService;
use std::sync::Arc;
use thiserror::Error;
use tower::limit::ConcurrencyLimitLayer;
use tower::load_shed::LoadShedLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ServiceState {
    pub config: Arc<Config>,
    pub repository: Arc<dyn Repository>,
    pub pg_pool: sqlx::PgPool,
    pub property_service: Arc<PropertyService>,
    pub transfer_service: Arc<TransferService>,
    pub qr_engine: Arc<QrEngine>,
    pub auth_service: Arc<AuthService>,
    pub storage: Arc<dyn StorageService>,
    pub ocr: Arc<dyn OcrService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database unreachable: {0}")]
    Database(String),
    #[error("migration failed: {0}")]
    Migration(String),
}

impl ServiceState {
    pub async fn bootstrap(config: Config) -> Result<Self, BootstrapError> {
        let pg = PgRepository::connect(&config.database.connection_url(), config.database.max_open_conns)
            .await
            .map_err(|e| BootstrapError::Database(e.to_string()))?;
        pg.migrate()
            .await
            .map_err(|e| BootstrapError::Migration(e.to_string()))?;

        let pg_pool = pg.pool().clone();
        let repository: Arc<dyn Repository> = Arc::new(pg);
        let qr_engine = Arc::new(QrEngine::new(repository.clone()));
        let property_service = Arc::new(PropertyService::new(repository.clone()));
        let transfer_service = Arc::new(TransferService::new(repository.clone(), qr_engine.clone()));
        let auth_service = Arc::new(AuthService::new(
            repository.clone(),
            AuthConfig {
                jwt_secret: config.jwt.secret_key.clone(),
                access_token_expiry: config.jwt.access_expiry,
                refresh_token_expiry: config.jwt.refresh_expiry,
                issuer: config.jwt.issuer.clone(),
                audience: config.jwt.audience.clone(),
                refresh_enabled: config.jwt.refresh_enabled,
            },
        ));

        let storage: Arc<dyn StorageService> = Arc::new(LocalFileStorage::new(format!(
            "./data/{}",
            config.storage.bucket_name
        )));
        let ocr: Arc<dyn OcrService> = Arc::new(UnconfiguredOcrService);

        Ok(Self {
            config: Arc::new(config),
            repository,
            pg_pool,
            property_service,
            transfer_service,
            qr_engine,
            auth_service,
            storage,
            ocr,
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    let cors = if state.config.cors.origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let concurrency_cap = (state.config.database.max_open_conns as usize).max(1) * 4;

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/refresh", post(handlers::auth::refresh))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/me", get(handlers::auth::me))
        .route("/api/auth/users", get(handlers::auth::search_users))
        .route(
            "/api/inventory",
            post(handlers::inventory::create).get(handlers::inventory::list),
        )
        .route("/api/inventory/:id", get(handlers::inventory::get_by_id))
        .route(
            "/api/inventory/serial/:serial",
            get(handlers::inventory::get_by_serial),
        )
        .route(
            "/api/inventory/history/:serial",
            get(handlers::inventory::history),
        )
        .route(
            "/api/inventory/qrcode/:property_id",
            post(handlers::qrcodes::generate),
        )
        .route(
            "/api/qrcodes/:id/report-damaged",
            post(handlers::qrcodes::report_damaged),
        )
        .route("/api/qrcodes", get(handlers::qrcodes::list))
        .route(
            "/api/transfers",
            post(handlers::transfers::request_manual).get(handlers::transfers::list),
        )
        .route(
            "/api/transfers/qr-initiate",
            post(handlers::transfers::request_by_qr),
        )
        .route("/api/transfers/:id", get(handlers::transfers::get_by_id))
        .route(
            "/api/transfers/:id/status",
            patch(handlers::transfers::resolve),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(ConcurrencyLimitLayer::new(concurrency_cap))
        .layer(LoadShedLayer::new())
        .with_state(state)
}

/// Thin wrapper mapping [`HandReceiptError`] onto HTTP responses per the
/// status table in spec §4.7, matching the grounding project's
/// `ApiError`/`IntoResponse` split.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ApiError(HandReceiptError);

impl From<HandReceiptError> for ApiError {
    fn from(err: HandReceiptError) -> Self {
        Self(err)
    }
}

fn status_for(err: &HandReceiptError) -> StatusCode {
    use HandReceiptError::*;
    match err {
        InvalidInput(_) | MissingField(_) | OutOfRange(_) | QRInvalidHash | QRDeactivated
        | QROutdated | QRPropertyLost => StatusCode::BAD_REQUEST,
        Unauthenticated | SessionRevoked | TokenExpired => StatusCode::UNAUTHORIZED,
        Unauthorized(_) => StatusCode::FORBIDDEN,
        PropertyNotFound(_) | UserNotFound(_) | TransferNotFound(_) | QRNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        SerialAlreadyExists { .. }
        | TransferAlreadyPending
        | TransferNotPending
        | OwnershipChanged
        | SelfTransferForbidden
        | QRHashCollision => StatusCode::CONFLICT,
        DatabaseUnavailable(_) | LedgerUnavailable(_) | Timeout => StatusCode::SERVICE_UNAVAILABLE,
        Canceled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);
        if err.is_infrastructure() {
            tracing::error!(kind = err.kind(), err = %err, "infrastructure error");
        } else {
            tracing::debug!(kind = err.kind(), err = %err, "request failed");
        }

        let body = Json(serde_json::json!({
            "error": err.kind(),
            "message": err.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Router tests covering the QR-transfer scenarios: happy path, tampered
/// hash, self-transfer, an outdated QR, and a concurrent duplicate serial.
/// Built against [`handreceipt_core::repository::memory::MemoryRepository`]
/// so these run without a live Postgres instance.
#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use handreceipt_adapters::NoOpStorage;
    use handreceipt_core::repository::memory::MemoryRepository;
    use handreceipt_core::repository::CreateUserInput;
    use handreceipt_core::types::Role;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_config() -> Config {
        Config {
            database: config::DatabaseConfig {
                host: "localhost".to_string(),
                port: 5432,
                user: "handreceipt".to_string(),
                password: String::new(),
                name: "handreceipt".to_string(),
                ssl_mode: "disable".to_string(),
                max_open_conns: 5,
                max_idle_conns: 1,
                conn_max_lifetime: std::time::Duration::from_secs(1800),
            },
            jwt: config::JwtConfig {
                secret_key: "test-secret".to_string(),
                access_expiry: chrono::Duration::minutes(15),
                refresh_expiry: chrono::Duration::days(30),
                issuer: "handreceipt".to_string(),
                audience: "handreceipt-clients".to_string(),
                refresh_enabled: true,
            },
            cors: config::CorsConfig {
                origins: vec!["*".to_string()],
                allowed_methods: vec!["GET".to_string(), "POST".to_string(), "PATCH".to_string()],
                allowed_headers: vec!["authorization".to_string(), "content-type".to_string()],
                credentials: false,
            },
            storage: config::StorageConfig {
                storage_type: "memory".to_string(),
                bucket_name: "test".to_string(),
            },
            server_port: 0,
            server_environment: "test".to_string(),
            ledger_enabled: true,
            config_name: "test".to_string(),
        }
    }

    /// Bypasses [`ServiceState::bootstrap`] (which requires a live Postgres
    /// connection) in favor of wiring the services directly against
    /// `MemoryRepository`. `pg_pool` is a lazily-constructed pool that never
    /// connects — fine here since only the scheduler, not started in these
    /// tests, touches it.
    fn test_app() -> (Router, Arc<MemoryRepository>) {
        let repository = Arc::new(MemoryRepository::new());
        let repo_dyn: Arc<dyn Repository> = repository.clone();
        let qr_engine = Arc::new(QrEngine::new(repo_dyn.clone()));
        let property_service = Arc::new(PropertyService::new(repo_dyn.clone()));
        let transfer_service = Arc::new(TransferService::new(repo_dyn.clone(), qr_engine.clone()));
        let config = test_config();
        let auth_service = Arc::new(AuthService::new(
            repo_dyn.clone(),
            AuthConfig {
                jwt_secret: config.jwt.secret_key.clone(),
                access_token_expiry: config.jwt.access_expiry,
                refresh_token_expiry: config.jwt.refresh_expiry,
                issuer: config.jwt.issuer.clone(),
                audience: config.jwt.audience.clone(),
                refresh_enabled: config.jwt.refresh_enabled,
            },
        ));

        let state = ServiceState {
            config: Arc::new(config),
            repository: repo_dyn,
            pg_pool: sqlx::PgPool::connect_lazy("postgres://unused/unused")
                .expect("lazy pool construction never touches the network"),
            property_service,
            transfer_service,
            qr_engine,
            auth_service,
            storage: Arc::new(NoOpStorage::default()),
            ocr: Arc::new(UnconfiguredOcrService),
        };
        (build_router(state), repository)
    }

    async fn seed_user(repo: &MemoryRepository, username: &str, role: Role) -> i64 {
        let hash = AuthService::hash_password("correct horse battery staple").unwrap();
        repo.create_user(CreateUserInput {
            username: username.to_string(),
            password_hash: hash,
            name: username.to_string(),
            rank: "SPC".to_string(),
            unit: "1-1 IN".to_string(),
            role,
        })
        .await
        .unwrap()
        .id
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login(app: &Router, username: &str) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/login")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"username": username, "password": "correct horse battery staple"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await["accessToken"].as_str().unwrap().to_string()
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = if let Some(body) = body {
            builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        } else {
            builder.body(Body::empty()).unwrap()
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, json_body(response).await)
    }

    #[tokio::test]
    async fn happy_path_qr_transfer_completes_and_ledger_stays_intact() {
        let (app, repo) = test_app();
        let alice_id = seed_user(&repo, "alice", Role::NCO).await;
        seed_user(&repo, "bob", Role::Soldier).await;

        let alice_token = login(&app, "alice").await;
        let bob_token = login(&app, "bob").await;

        let (status, created) = call(
            &app,
            "POST",
            "/api/inventory",
            Some(&alice_token),
            Some(json!({"name": "M4 Carbine", "serialNumber": "M4-TEST-001"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let property_id = created["id"].as_i64().unwrap();
        assert_eq!(created["assignedToUserId"].as_i64().unwrap(), alice_id);

        let (status, qr_response) = call(
            &app,
            "POST",
            &format!("/api/inventory/qrcode/{property_id}"),
            Some(&alice_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let payload = qr_response["payload"].clone();

        let (status, transfer) = call(
            &app,
            "POST",
            "/api/transfers/qr-initiate",
            Some(&bob_token),
            Some(json!({"payload": payload})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(transfer["status"], "Requested");
        let transfer_id = transfer["id"].as_i64().unwrap();

        let (status, resolved) = call(
            &app,
            "PATCH",
            &format!("/api/transfers/{transfer_id}/status"),
            Some(&alice_token),
            Some(json!({"status": "Approved"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["status"], "Approved");

        let bob_id = repo.get_user_by_username("bob").await.unwrap().unwrap().id;
        let (status, property_after) = call(
            &app,
            "GET",
            &format!("/api/inventory/{property_id}"),
            Some(&bob_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(property_after["assignedToUserId"].as_i64().unwrap(), bob_id);

        let (status, history) = call(
            &app,
            "GET",
            "/api/inventory/history/M4-TEST-001",
            Some(&alice_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let event_types: Vec<&str> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["eventType"].as_str().unwrap())
            .collect();
        assert_eq!(
            event_types,
            vec![
                "ITEM_CREATE",
                "QR_GENERATED",
                "TRANSFER_REQUEST",
                "QR_DEACTIVATED",
                "TRANSFER_APPROVED",
            ]
        );

        let report = repo.ledger_verify(1, i64::MAX).await.unwrap();
        assert!(report.ok);
        assert!(report.first_broken_at.is_none());
    }

    #[tokio::test]
    async fn tampered_qr_hash_is_rejected() {
        let (app, repo) = test_app();
        seed_user(&repo, "alice", Role::NCO).await;
        seed_user(&repo, "bob", Role::Soldier).await;
        let alice_token = login(&app, "alice").await;
        let bob_token = login(&app, "bob").await;

        let (_, created) = call(
            &app,
            "POST",
            "/api/inventory",
            Some(&alice_token),
            Some(json!({"name": "Radio", "serialNumber": "RAD-TAMPER"})),
        )
        .await;
        let property_id = created["id"].as_i64().unwrap();
        let (_, qr_response) = call(
            &app,
            "POST",
            &format!("/api/inventory/qrcode/{property_id}"),
            Some(&alice_token),
            None,
        )
        .await;
        let mut payload = qr_response["payload"].clone();
        payload["qrHash"] = json!("0".repeat(64));

        let (status, body) = call(
            &app,
            "POST",
            "/api/transfers/qr-initiate",
            Some(&bob_token),
            Some(json!({"payload": payload})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "QRInvalidHash");
    }

    #[tokio::test]
    async fn self_transfer_is_forbidden() {
        let (app, repo) = test_app();
        seed_user(&repo, "alice", Role::NCO).await;
        let alice_token = login(&app, "alice").await;

        let (_, created) = call(
            &app,
            "POST",
            "/api/inventory",
            Some(&alice_token),
            Some(json!({"name": "Radio", "serialNumber": "RAD-SELF"})),
        )
        .await;
        let property_id = created["id"].as_i64().unwrap();
        let (_, qr_response) = call(
            &app,
            "POST",
            &format!("/api/inventory/qrcode/{property_id}"),
            Some(&alice_token),
            None,
        )
        .await;
        let payload = qr_response["payload"].clone();

        let (status, body) = call(
            &app,
            "POST",
            "/api/transfers/qr-initiate",
            Some(&alice_token),
            Some(json!({"payload": payload})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "SelfTransferForbidden");
    }

    #[tokio::test]
    async fn outdated_qr_is_rejected_after_ownership_moves_on() {
        let (app, repo) = test_app();
        seed_user(&repo, "alice", Role::NCO).await;
        seed_user(&repo, "bob", Role::Soldier).await;
        seed_user(&repo, "charlie", Role::Soldier).await;
        let alice_token = login(&app, "alice").await;
        let bob_token = login(&app, "bob").await;
        let charlie_token = login(&app, "charlie").await;

        let (_, created) = call(
            &app,
            "POST",
            "/api/inventory",
            Some(&alice_token),
            Some(json!({"name": "NVGs", "serialNumber": "NVG-OUTDATED"})),
        )
        .await;
        let property_id = created["id"].as_i64().unwrap();
        let (_, qr_response) = call(
            &app,
            "POST",
            &format!("/api/inventory/qrcode/{property_id}"),
            Some(&alice_token),
            None,
        )
        .await;
        let old_payload = qr_response["payload"].clone();

        let (_, transfer) = call(
            &app,
            "POST",
            "/api/transfers/qr-initiate",
            Some(&bob_token),
            Some(json!({"payload": old_payload.clone()})),
        )
        .await;
        let transfer_id = transfer["id"].as_i64().unwrap();
        let (status, _) = call(
            &app,
            "PATCH",
            &format!("/api/transfers/{transfer_id}/status"),
            Some(&alice_token),
            Some(json!({"status": "Approved"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Charlie scans the same bytes Bob used; ownership has since moved to Bob.
        let (status, body) = call(
            &app,
            "POST",
            "/api/transfers/qr-initiate",
            Some(&charlie_token),
            Some(json!({"payload": old_payload})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "QROutdated");
    }

    #[tokio::test]
    async fn duplicate_serial_under_concurrency_yields_one_winner() {
        let (app, repo) = test_app();
        seed_user(&repo, "alice", Role::NCO).await;
        let alice_token = login(&app, "alice").await;

        let app_a = app.clone();
        let app_b = app.clone();
        let token_a = alice_token.clone();
        let token_b = alice_token.clone();

        let (result_a, result_b) = tokio::join!(
            call(
                &app_a,
                "POST",
                "/api/inventory",
                Some(&token_a),
                Some(json!({"name": "Helmet", "serialNumber": "DUP-001"})),
            ),
            call(
                &app_b,
                "POST",
                "/api/inventory",
                Some(&token_b),
                Some(json!({"name": "Helmet", "serialNumber": "DUP-001"})),
            ),
        );

        let statuses = [result_a.0, result_b.0];
        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CREATED).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(), 1);
    }
}
