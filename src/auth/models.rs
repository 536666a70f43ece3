//! Authentication Models
//! Mission: Define the user, token, and wire-level data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub role: Role,
    pub enabled: bool,
    pub account_locked: bool,
    pub failed_attempts: u32,
    pub lock_time: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Fresh account as created by registration: enabled, unlocked, zero failures.
    pub fn new(email: String, first_name: String, last_name: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            first_name,
            last_name,
            password_hash,
            role: Role::User,
            enabled: true,
            account_locked: false,
            failed_attempts: 0,
            lock_time: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Authorities derived purely from the role.
    pub fn authorities(&self) -> Vec<String> {
        self.role.authorities()
    }
}

/// User roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "ADMIN")]
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "USER" => Some(Role::User),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Authority set for this role. A pure function, no inheritance involved.
    pub fn authorities(&self) -> Vec<String> {
        vec![self.as_str().to_string()]
    }
}

/// Kind of persisted token. Only bearer access tokens are ledger-backed;
/// refresh tokens stay stateless.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenKind {
    Bearer,
}

impl TokenKind {
    pub fn as_str(&self) -> &str {
        match self {
            TokenKind::Bearer => "Bearer",
        }
    }
}

/// One issued access token as recorded in the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: Uuid,
    pub token: String,
    pub kind: TokenKind,
    pub revoked: bool,
    pub expired: bool,
    pub user_id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn new(raw: String, user_id: Uuid, meta: &ClientMeta) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            token: raw,
            kind: TokenKind::Bearer,
            revoked: false,
            expired: false,
            user_id,
            user_agent: meta.user_agent.clone(),
            ip_address: meta.ip_address.clone(),
            created_at: now,
            updated_at: now,
            last_used_at: None,
        }
    }

    /// Live = neither revoked nor expired. Codec validity is checked separately.
    pub fn is_live(&self) -> bool {
        !self.revoked && !self.expired
    }
}

/// JWT claims payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String, // subject (user id)
    pub email: String,
    pub role: Role,
    /// Unique token id; keeps two tokens minted in the same second from
    /// colliding in the ledger's unique raw-token index.
    pub jti: String,
    pub iat: usize,
    pub exp: usize,
}

/// Client metadata captured from the issuing request
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Authenticated identity attached to a request after validation
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub authorities: Vec<String>,
}

/// Registration request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Outcome of a successful register or login
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: TokenKind,
    pub expires_in: u64, // seconds, equals the configured access-token TTL
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Wire-level auth response. Null fields are omitted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl AuthResponse {
    pub fn from_session(session: AuthSession) -> Self {
        let none_if_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        Self {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            token_type: session.token_type.as_str().to_string(),
            expires_in: session.expires_in,
            email: none_if_empty(session.email),
            first_name: none_if_empty(session.first_name),
            last_name: none_if_empty(session.last_name),
        }
    }
}
