//! Typed configuration loaded from environment variables prefixed
//! `HANDRECEIPT_`, per spec §6, with `dotenvy` support for local `.env`
//! loading.

use chrono::Duration;
use std::time::Duration as StdDuration;

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("HANDRECEIPT_{name}")).ok()
}

fn env_or(name: &str, default: &str) -> String {
    env_var(name).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime: StdDuration,
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }

    fn from_env() -> Self {
        Self {
            host: env_or("DATABASE_HOST", "localhost"),
            port: env_parse_or("DATABASE_PORT", 5432),
            user: env_or("DATABASE_USER", "handreceipt"),
            password: env_or("DATABASE_PASSWORD", ""),
            name: env_or("DATABASE_NAME", "handreceipt"),
            ssl_mode: env_or("DATABASE_SSL_MODE", "disable"),
            max_open_conns: env_parse_or("DATABASE_MAX_OPEN_CONNS", 20),
            max_idle_conns: env_parse_or("DATABASE_MAX_IDLE_CONNS", 5),
            conn_max_lifetime: StdDuration::from_secs(env_parse_or(
                "DATABASE_CONN_MAX_LIFETIME_SECS",
                1800,
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret_key: String,
    pub access_expiry: Duration,
    pub refresh_expiry: Duration,
    pub issuer: String,
    pub audience: String,
    pub refresh_enabled: bool,
}

impl JwtConfig {
    fn from_env() -> Self {
        Self {
            secret_key: env_or("JWT_SECRET_KEY", "dev-secret-change-me"),
            access_expiry: Duration::minutes(env_parse_or("JWT_ACCESS_EXPIRY_MINUTES", 15)),
            refresh_expiry: Duration::days(env_parse_or("JWT_REFRESH_EXPIRY_DAYS", 30)),
            issuer: env_or("JWT_ISSUER", "handreceipt"),
            audience: env_or("JWT_AUDIENCE", "handreceipt-clients"),
            refresh_enabled: env_parse_or("JWT_REFRESH_ENABLED", true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub credentials: bool,
}

impl CorsConfig {
    fn from_env() -> Self {
        let split = |raw: String| -> Vec<String> {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            origins: split(env_or("CORS_ORIGINS", "*")),
            allowed_methods: split(env_or("CORS_ALLOWED_METHODS", "GET,POST,PATCH,DELETE")),
            allowed_headers: split(env_or("CORS_ALLOWED_HEADERS", "authorization,content-type")),
            credentials: env_parse_or("CORS_CREDENTIALS", false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub storage_type: String,
    pub bucket_name: String,
}

impl StorageConfig {
    fn from_env() -> Self {
        Self {
            storage_type: env_or("STORAGE_TYPE", "local"),
            bucket_name: env_or("STORAGE_BUCKET_NAME", "handreceipt-local"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub cors: CorsConfig,
    pub storage: StorageConfig,
    pub server_port: u16,
    pub server_environment: String,
    pub ledger_enabled: bool,
    pub config_name: String,
}

impl Config {
    pub fn from_env() -> Self {
        if let Some(config_name) = env_var("CONFIG_NAME") {
            let candidate = format!(".env.{config_name}");
            let _ = dotenvy::from_filename(candidate);
        }
        let _ = dotenvy::dotenv();

        Self {
            database: DatabaseConfig::from_env(),
            jwt: JwtConfig::from_env(),
            cors: CorsConfig::from_env(),
            storage: StorageConfig::from_env(),
            server_port: env_parse_or("SERVER_PORT", 8080),
            server_environment: env_or("SERVER_ENVIRONMENT", "development"),
            ledger_enabled: env_parse_or("LEDGER_ENABLED", true),
            config_name: env_or("CONFIG_NAME", "default"),
        }
    }
}
