//! Auth/Session (C6): credential verification, session issuance, access
//! and refresh tokens, validation, and revocation.

use crate::error::HandReceiptError;
use crate::repository::Repository;
use crate::types::{Role, Session, User, UserStatus};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_expiry: Duration,
    pub refresh_token_expiry: Duration,
    pub issuer: String,
    pub audience: String,
    pub refresh_enabled: bool,
}

/// JWT claims carried by access tokens, per spec §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub role: Role,
    pub status: UserStatus,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

pub struct LoginResult {
    pub user: User,
    pub tokens: TokenPair,
}

pub struct AuthService {
    repository: Arc<dyn Repository>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(repository: Arc<dyn Repository>, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    pub fn hash_password(password: &str) -> Result<String, HandReceiptError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HandReceiptError::InvalidInput(format!("password hashing failed: {e}")))
    }

    pub fn verify_password(hash: &str, password: &str) -> Result<bool, HandReceiptError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| HandReceiptError::InvalidInput(format!("stored hash is malformed: {e}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResult, HandReceiptError> {
        let user = self
            .repository
            .get_user_by_username(username)
            .await?
            .ok_or(HandReceiptError::Unauthenticated)?;

        if matches!(user.status, UserStatus::Suspended) {
            return Err(HandReceiptError::Unauthorized("account is suspended".to_string()));
        }
        if !Self::verify_password(&user.password_hash, password)? {
            return Err(HandReceiptError::Unauthenticated);
        }

        let session_lifetime = if self.config.refresh_enabled {
            self.config.refresh_token_expiry
        } else {
            self.config.access_token_expiry
        };
        let expires_at = Utc::now() + session_lifetime;

        let session = self
            .repository
            .create_session(user.id, expires_at, None, None)
            .await?;

        let access_token = self.issue_access_token(&user, &session)?;

        let refresh_token = if self.config.refresh_enabled {
            let mut secret_bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut secret_bytes);
            let raw_token = format!("{}.{}", session.id, hex::encode(secret_bytes));
            let hash = hash_token(&raw_token);
            self.repository
                .rotate_refresh_token(session.id, uuid::Uuid::new_v4(), hash, expires_at)
                .await?;
            Some(raw_token)
        } else {
            None
        };

        Ok(LoginResult {
            user,
            tokens: TokenPair {
                access_token,
                refresh_token,
            },
        })
    }

    fn issue_access_token(&self, user: &User, session: &Session) -> Result<String, HandReceiptError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            session_id: session.id.to_string(),
            role: user.role,
            status: user.status,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now.timestamp(),
            exp: (now + self.config.access_token_expiry).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| HandReceiptError::InvalidInput(format!("token signing failed: {e}")))
    }

    /// Signature, expiry, issuer/audience, and session-not-revoked.
    pub async fn validate(&self, token: &str) -> Result<Claims, HandReceiptError> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.set_audience(&[self.config.audience.clone()]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => HandReceiptError::TokenExpired,
            _ => HandReceiptError::Unauthenticated,
        })?;

        let session_id: uuid::Uuid = data
            .claims
            .session_id
            .parse()
            .map_err(|_| HandReceiptError::Unauthenticated)?;
        let session = self
            .repository
            .get_session(session_id)
            .await?
            .ok_or(HandReceiptError::Unauthenticated)?;
        if session.is_revoked {
            return Err(HandReceiptError::SessionRevoked);
        }
        if session.expires_at < Utc::now() {
            return Err(HandReceiptError::TokenExpired);
        }

        self.repository.touch_session(session_id).await?;
        Ok(data.claims)
    }

    /// Re-issues an access token if the session is still valid, rotating
    /// the refresh token on every call (decision recorded in DESIGN.md).
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, HandReceiptError> {
        if !self.config.refresh_enabled {
            return Err(HandReceiptError::InvalidInput(
                "refresh tokens are disabled".to_string(),
            ));
        }

        let (session_id_raw, _secret) = refresh_token
            .split_once('.')
            .ok_or(HandReceiptError::Unauthenticated)?;
        let session_id: uuid::Uuid = session_id_raw
            .parse()
            .map_err(|_| HandReceiptError::Unauthenticated)?;

        let session = self
            .repository
            .get_session(session_id)
            .await?
            .ok_or(HandReceiptError::Unauthenticated)?;
        if session.is_revoked {
            return Err(HandReceiptError::SessionRevoked);
        }
        if session.expires_at < Utc::now() {
            return Err(HandReceiptError::TokenExpired);
        }

        let presented_hash = hash_token(refresh_token);
        if session.refresh_token_hash.as_deref() != Some(presented_hash.as_str()) {
            return Err(HandReceiptError::Unauthenticated);
        }

        let user = self
            .repository
            .get_user_by_id(session.user_id)
            .await?
            .ok_or_else(|| HandReceiptError::UserNotFound(session.user_id.to_string()))?;

        let mut secret_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let new_raw_token = format!("{}.{}", session.id, hex::encode(secret_bytes));
        let new_hash = hash_token(&new_raw_token);
        let new_expires_at = Utc::now() + self.config.refresh_token_expiry;

        let rotated = self
            .repository
            .rotate_refresh_token(session.id, uuid::Uuid::new_v4(), new_hash, new_expires_at)
            .await?;

        let access_token = self.issue_access_token(&user, &rotated)?;
        Ok(TokenPair {
            access_token,
            refresh_token: Some(new_raw_token),
        })
    }

    pub async fn logout(&self, session_id: uuid::Uuid) -> Result<(), HandReceiptError> {
        self.repository.revoke_session(session_id).await
    }
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trips() {
        let hash = AuthService::hash_password("correct horse battery staple").unwrap();
        assert!(AuthService::verify_password(&hash, "correct horse battery staple").unwrap());
        assert!(!AuthService::verify_password(&hash, "wrong password").unwrap());
    }

    #[tokio::test]
    async fn login_rejects_unknown_user() {
        use crate::repository::memory::MemoryRepository;
        let repo = Arc::new(MemoryRepository::new());
        let service = AuthService::new(
            repo,
            AuthConfig {
                jwt_secret: "test-secret".to_string(),
                access_token_expiry: Duration::minutes(15),
                refresh_token_expiry: Duration::days(30),
                issuer: "handreceipt".to_string(),
                audience: "handreceipt-clients".to_string(),
                refresh_enabled: true,
            },
        );
        let err = service.login("nobody", "whatever").await.unwrap_err();
        assert_eq!(err.kind(), "Unauthenticated");
    }
}
