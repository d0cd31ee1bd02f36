use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use super::types::AuthClaims;
use crate::shared::{AppError, AppState};

/// Extracting `AuthClaims` in a handler validates the Authorization Bearer
/// header against the shared token config. Routes without the extractor
/// stay public.
#[async_trait]
impl FromRequestParts<AppState> for AuthClaims {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| {
                warn!("Missing Authorization header in request");
                AppError::Unauthorized("Missing authorization header".to_string())
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            warn!("Invalid Authorization header format (expected Bearer token)");
            AppError::Unauthorized("Invalid authorization header format".to_string())
        })?;

        match state.token_config.validate_token(token) {
            Ok(claims) => Ok(claims),
            Err(e) => {
                warn!("JWT authentication failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Claims gated on the admin role, for mutating operations.
pub struct AdminUser(pub AuthClaims);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = AuthClaims::from_request_parts(parts, state).await?;

        if !claims.is_admin() {
            warn!(username = %claims.username, "Admin role required");
            return Err(AppError::Forbidden("Admin role required".to_string()));
        }

        Ok(AdminUser(claims))
    }
}
