//! Request Validation Filter
//! Mission: Establish (or reject) the caller's identity once per request

use crate::auth::jwt::{JwtCodec, TokenParseError};
use crate::auth::models::AuthContext;
use crate::auth::token_ledger::TokenLedger;
use crate::auth::user_store::UserStore;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything the filter needs to validate a bearer token.
#[derive(Clone)]
pub struct RequestValidationState {
    pub codec: Arc<JwtCodec>,
    pub ledger: Arc<TokenLedger>,
    pub users: Arc<UserStore>,
    /// Path prefixes that bypass the filter entirely (auth endpoints, docs).
    pub exempt_prefixes: Arc<Vec<String>>,
}

/// Single-pass bearer validation, applied to the whole router.
///
/// Only codec-level failures short-circuit with 401. A structurally valid
/// token that is missing from the ledger, revoked, or points at an unknown or
/// disabled user degrades the request to anonymous; downstream authorization
/// decides whether the route requires identity.
pub async fn request_validation(
    State(state): State<RequestValidationState>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if is_exempt(&path, &state.exempt_prefixes) {
        return next.run(req).await;
    }

    let Some(raw) = bearer_token(&req) else {
        // No credentials offered: anonymous pass-through.
        return next.run(req).await;
    };

    let claims = match state.codec.parse_and_verify(&raw) {
        Ok(claims) => claims,
        Err(TokenParseError::Expired) => {
            debug!(path = %path, "Rejected expired token");
            return unauthorized("Token has expired");
        }
        Err(TokenParseError::Invalid) => {
            debug!(path = %path, "Rejected invalid token");
            return unauthorized("Invalid token");
        }
    };

    let live = match state.ledger.is_live(&raw) {
        Ok(live) => live,
        Err(e) => {
            warn!("Token ledger lookup failed: {}", e);
            return internal_error();
        }
    };
    if !live {
        debug!(path = %path, "Token not live in ledger; continuing anonymous");
        return next.run(req).await;
    }

    let user = match Uuid::parse_str(&claims.sub) {
        Ok(id) => match state.users.find_by_id(&id) {
            Ok(user) => user,
            Err(e) => {
                warn!("User lookup failed during validation: {}", e);
                return internal_error();
            }
        },
        Err(_) => None,
    };

    let Some(user) = user.filter(|u| u.enabled && !u.account_locked) else {
        debug!(path = %path, "Token subject unusable; continuing anonymous");
        return next.run(req).await;
    };

    if let Err(e) = state.ledger.touch_last_used(&raw, Utc::now()) {
        // Bookkeeping only; the request still proceeds authenticated.
        warn!("Failed to touch token last-used timestamp: {}", e);
    }

    req.extensions_mut().insert(AuthContext {
        user_id: user.id,
        email: user.email.clone(),
        role: user.role,
        authorities: user.authorities(),
    });

    next.run(req).await
}

/// Extract the authenticated identity established by the filter, if any.
pub fn auth_context(req: &Request) -> Option<&AuthContext> {
    req.extensions().get::<AuthContext>()
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

fn is_exempt(path: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| path.starts_with(p.as_str()))
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "status": 401,
            "error": "Unauthorized",
            "message": message,
        })),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "status": 500,
            "error": "Internal Server Error",
            "message": "Internal server error",
        })),
    )
        .into_response()
}
