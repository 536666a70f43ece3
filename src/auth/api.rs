//! Authentication API Endpoints
//! Mission: Expose register, login, and logout over HTTP

use crate::auth::engine::{AuthEngine, AuthError};
use crate::auth::middleware::auth_context;
use crate::auth::models::{AuthResponse, ClientMeta, LoginRequest, RegisterRequest, Role};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub engine: Arc<AuthEngine>,
}

/// Routes owned by this module. The register/login/logout paths are exempt
/// from the validation filter; `/api/auth/me` is not.
pub fn auth_router(state: AuthState) -> Router {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(get_current_user))
        .with_state(state)
}

pub fn public_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Register endpoint - POST /api/auth/register
async fn register(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let meta = client_meta(&headers);
    let session = state.engine.register(payload, &meta).await?;
    Ok(Json(AuthResponse::from_session(session)))
}

/// Login endpoint - POST /api/auth/login
async fn login(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let meta = client_meta(&headers);
    let session = state.engine.login(payload, &meta).await?;
    Ok(Json(AuthResponse::from_session(session)))
}

/// Logout endpoint - POST /api/auth/logout
/// Revokes the presented bearer token. Always 204; a missing or unknown
/// token is a no-op.
async fn logout(State(state): State<AuthState>, headers: HeaderMap) -> Result<StatusCode, AuthError> {
    let raw = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    if let Some(raw) = raw {
        let meta = client_meta(&headers);
        state.engine.logout(raw, &meta).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Current identity - GET /api/auth/me
/// Reads the context the validation filter attached; no engine call needed.
async fn get_current_user(req: Request) -> Response {
    match auth_context(&req) {
        Some(ctx) => Json(MeResponse {
            id: ctx.user_id.to_string(),
            email: ctx.email.clone(),
            role: ctx.role,
            authorities: ctx.authorities.clone(),
        })
        .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "status": 401,
                "error": "Unauthorized",
                "message": "Authentication required",
            })),
        )
            .into_response(),
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    id: String,
    email: String,
    role: Role,
    authorities: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let user_agent = headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    // First hop of X-Forwarded-For, falling back to X-Real-IP.
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string())
        });

    ClientMeta {
        user_agent,
        ip_address,
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AuthError::Validation(msg) => (StatusCode::BAD_REQUEST, "Bad Request", msg.clone()),
            AuthError::DuplicateIdentity => (
                StatusCode::CONFLICT,
                "Conflict",
                "Email already registered".to_string(),
            ),
            AuthError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized",
                "Invalid email or password".to_string(),
            ),
            AuthError::AccountLocked => (
                StatusCode::LOCKED,
                "Locked",
                "Account is locked".to_string(),
            ),
            AuthError::NotFound | AuthError::Storage(_) => {
                // Defect or store failure: log the detail, answer generically.
                error!("Auth operation failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(json!({
                "status": status.as_u16(),
                "error": error,
                "message": message,
            })),
        )
            .into_response()
    }
}
