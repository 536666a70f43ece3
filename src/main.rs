//! Pulse Auth - Authentication & Token Lifecycle Service
//! Mission: Issue and validate identity credentials for the platform

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use dotenv::dotenv;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse_auth_backend::{
    auth::{
        api::{self, AuthState},
        audit::AuditTrail,
        events::{AuthEventNotifier, LogNotifier, WebhookNotifier},
        request_validation, AuthEngine, JwtCodec, LockoutPolicy, RequestValidationState,
        TokenLedger, UserStore,
    },
    config::AuthConfig,
    middleware::request_logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let config = AuthConfig::from_env();

    for path in [
        &config.user_db_path,
        &config.token_db_path,
        &config.audit_db_path,
    ] {
        ensure_parent_dir(path)?;
    }

    let users = Arc::new(UserStore::new(&config.user_db_path)?);
    let tokens = Arc::new(TokenLedger::new(&config.token_db_path)?);
    let audit = Arc::new(AuditTrail::new(&config.audit_db_path)?);
    let codec = Arc::new(JwtCodec::new(
        config.jwt_secret.clone(),
        config.access_token_ttl_secs,
        config.refresh_token_ttl_secs,
    ));

    let notifier: Arc<dyn AuthEventNotifier> = match &config.events_webhook_url {
        Some(url) => {
            info!("📣 Auth events will be posted to {}", url);
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    let engine = Arc::new(AuthEngine::new(
        users.clone(),
        tokens.clone(),
        codec.clone(),
        LockoutPolicy::new(config.lockout_threshold),
        notifier,
        audit,
    ));

    let validation_state = RequestValidationState {
        codec,
        ledger: tokens,
        users,
        exempt_prefixes: Arc::new(config.exempt_path_prefixes.clone()),
    };

    let app = Router::new()
        .merge(api::public_router())
        .merge(api::auth_router(AuthState { engine }))
        .layer(from_fn_with_state(validation_state, request_validation))
        .layer(from_fn(request_logging))
        .layer(cors_layer(&config.allowed_origins));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("🎯 Auth service listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_auth_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// CORS mirrors the configured origin list; with no list configured the
/// service stays permissive for development.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-requested-with"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory for {}", path))?;
        }
    }
    Ok(())
}
