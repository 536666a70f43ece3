//! Service Configuration
//! Mission: Gather all tunables from the environment in one place

use std::env;
use tracing::warn;

/// Runtime configuration, sourced from environment variables (and `.env` in
/// development). Every field has a sensible default except the JWT secret,
/// which gets a loud warning when left unset.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub bind_addr: String,
    pub user_db_path: String,
    pub token_db_path: String,
    pub audit_db_path: String,
    pub jwt_secret: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub lockout_threshold: u32,
    pub exempt_path_prefixes: Vec<String>,
    pub allowed_origins: Vec<String>,
    pub events_webhook_url: Option<String>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("⚠️  JWT_SECRET not set - using an insecure development secret");
            "insecure-dev-secret-change-me".to_string()
        });

        let access_token_ttl_secs = env::var("ACCESS_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(900); // 15 minutes

        let refresh_token_ttl_secs = env::var("REFRESH_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(604_800); // 7 days

        let lockout_threshold = env::var("LOCKOUT_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(5);

        let exempt_path_prefixes = env::var("AUTH_EXEMPT_PREFIXES")
            .map(|v| split_csv(&v))
            .unwrap_or_else(|_| {
                vec![
                    "/api/auth/register".to_string(),
                    "/api/auth/login".to_string(),
                    "/api/auth/logout".to_string(),
                    "/health".to_string(),
                    "/docs".to_string(),
                ]
            });

        let allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| split_csv(&v))
            .unwrap_or_default();

        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            user_db_path: env::var("USER_DB_PATH").unwrap_or_else(|_| "data/users.db".to_string()),
            token_db_path: env::var("TOKEN_DB_PATH")
                .unwrap_or_else(|_| "data/tokens.db".to_string()),
            audit_db_path: env::var("AUDIT_DB_PATH")
                .unwrap_or_else(|_| "data/audit.db".to_string()),
            jwt_secret,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
            lockout_threshold,
            exempt_path_prefixes,
            allowed_origins,
            events_webhook_url: env::var("AUTH_EVENTS_WEBHOOK_URL").ok(),
        }
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_csv() {
        assert_eq!(
            split_csv("http://a.com, http://b.com ,"),
            vec!["http://a.com".to_string(), "http://b.com".to_string()]
        );
        assert!(split_csv("").is_empty());
    }
}
