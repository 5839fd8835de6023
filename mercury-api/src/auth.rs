use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, StatusCode},
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing;

use crate::state::ApiState;

/// JWT claims: a token authenticates one device of one user.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_uuid: String,
    pub device_id: String,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedDevice {
    pub user_uuid: String,
    pub device_id: String,
}

fn extract_token(auth_header: Option<&str>) -> Option<String> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
}

pub fn generate_token(
    user_uuid: &str,
    device_id: &str,
    secret: &str,
    expires_in_days: u64,
) -> Result<String, StatusCode> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .as_secs() as usize;

    let claims = Claims {
        user_uuid: user_uuid.to_string(),
        device_id: device_id.to_string(),
        exp: now + (expires_in_days * 24 * 60 * 60) as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| {
        tracing::error!("Failed to generate JWT token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, StatusCode> {
    let decoding_key = DecodingKey::from_secret(secret.as_ref());
    let validation = Validation::default();

    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(token_data) => Ok(token_data.claims),
        Err(e) => {
            tracing::debug!("JWT verification failed: {}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Bearer-token middleware. Skips the health check, the WebSocket handshake
/// (which carries its token as a query parameter) and the token mint. Every
/// authenticated request also touches the device-active throttler.
pub async fn auth_middleware(
    mut req: Request,
    next: axum::middleware::Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();
    if path == "/health" || path.starts_with("/ws") || path == "/api/v1/auth/token" {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match extract_token(auth_header) {
        Some(t) => t,
        None => {
            tracing::debug!("Missing Authorization header");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let state = req
        .extensions()
        .get::<ApiState>()
        .cloned()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let claims = verify_token(&token, &state.ctx.config.server.jwt_secret)?;

    state.syncer.touch(&claims.user_uuid, &claims.device_id);

    req.extensions_mut().insert(AuthenticatedDevice {
        user_uuid: claims.user_uuid,
        device_id: claims.device_id,
    });

    Ok(next.run(req).await)
}
