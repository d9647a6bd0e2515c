//! Bearer 토큰 인증
//!
//! - 토큰 없음 → 401
//! - 검증 실패 (current/previous 모두) → 403

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::commands::AppState;
use crate::error::AppError;
use crate::secrets::Claims;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// 보호 라우트 미들웨어
///
/// 검증된 클레임은 request extension으로 전달됩니다.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;

    let claims = state
        .jwt
        .verify(token)
        .map_err(|e| AppError::Forbidden(e.to_string()))?;

    tracing::debug!(user_id = claims.user_id, username = %claims.username, "request authenticated");
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// GET /api/auth/validate
pub async fn validate(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let claims: Option<Claims> = bearer_token(&headers).and_then(|token| state.jwt.verify(token).ok());

    match claims {
        Some(claims) => Json(ValidateResponse {
            valid: true,
            user_id: Some(claims.user_id),
            role: claims.role_name,
        })
        .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(ValidateResponse {
                valid: false,
                user_id: None,
                role: None,
            }),
        )
            .into_response(),
    }
}
