use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use headers::{authorization::Bearer, Authorization, HeaderMapExt};
use tracing::warn;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::jwt::validate_token;

/// Resolves the bearer token into a `User` and stores it in the request extensions.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if !request.headers().contains_key(AUTHORIZATION) {
        return Err(AppError::Auth("Access token required".to_string()));
    }

    let bearer = request
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))?;

    let user = validate_token(bearer.token(), &config.supabase_jwt_secret).map_err(|e| {
        warn!("Rejected bearer token: {}", e);
        AppError::Auth("Invalid or expired token".to_string())
    })?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Fails with `Forbidden` unless the caller holds one of `roles`.
pub fn require_role(user: &User, roles: &[&str]) -> Result<(), AppError> {
    if user.has_any_role(roles) {
        Ok(())
    } else {
        warn!("User {} with role {:?} refused, needs one of {:?}", user.id, user.role, roles);
        Err(AppError::Forbidden("Insufficient permissions".to_string()))
    }
}
