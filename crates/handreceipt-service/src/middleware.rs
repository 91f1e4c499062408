//! Auth extraction: bearer parsing and session resolution as an axum
//! `FromRequestParts` impl, per spec §4.7's middleware pipeline.

use crate::{ApiError, ServiceState};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::RequestPartsExt;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use handreceipt_core::error::HandReceiptError;
use handreceipt_core::types::{Role, UserStatus};

/// The authenticated caller, resolved from a validated access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub session_id: uuid::Uuid,
    pub role: Role,
    pub status: UserStatus,
}

#[axum::async_trait]
impl FromRequestParts<ServiceState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| ApiError::from(HandReceiptError::Unauthenticated))?;

        let claims = state.auth_service.validate(bearer.token()).await?;
        let user_id: i64 = claims
            .sub
            .parse()
            .map_err(|_| ApiError::from(HandReceiptError::Unauthenticated))?;
        let session_id: uuid::Uuid = claims
            .session_id
            .parse()
            .map_err(|_| ApiError::from(HandReceiptError::Unauthenticated))?;

        if matches!(claims.status, UserStatus::Suspended) {
            return Err(ApiError::from(HandReceiptError::Unauthorized(
                "account is suspended".to_string(),
            )));
        }

        Ok(AuthUser {
            user_id,
            session_id,
            role: claims.role,
            status: claims.status,
        })
    }
}

/// Role gate: per-route closure checking the caller holds one of `roles`.
pub fn require_role(user: &AuthUser, roles: &[Role]) -> Result<(), ApiError> {
    if roles.contains(&user.role) {
        Ok(())
    } else {
        Err(ApiError::from(HandReceiptError::Unauthorized(format!(
            "role {:?} is not permitted to perform this action",
            user.role
        ))))
    }
}
