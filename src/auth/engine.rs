//! Authentication Engine
//! Mission: Orchestrate registration, login, and the token lifecycle

use crate::auth::audit::{AuditAction, AuditEntry, AuditTrail};
use crate::auth::events::{AuthEvent, AuthEventNotifier, EVENT_USER_LOGIN, EVENT_USER_REGISTERED};
use crate::auth::jwt::JwtCodec;
use crate::auth::lockout::LockoutPolicy;
use crate::auth::models::{AuthSession, ClientMeta, LoginRequest, RegisterRequest, TokenRecord, User};
use crate::auth::token_ledger::TokenLedger;
use crate::auth::user_store::UserStore;
use anyhow::Context;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Business failures of the auth operations, translated to structured JSON at
/// the HTTP boundary. Codec-level failures (expired/invalid token) live in
/// [`crate::auth::jwt::TokenParseError`] and only surface in the filter.
#[derive(Debug)]
pub enum AuthError {
    /// Malformed input (bad email shape, empty password).
    Validation(String),
    /// Email already registered.
    DuplicateIdentity,
    /// Unknown email or wrong password; deliberately indistinguishable.
    InvalidCredentials,
    /// Account hit the lockout threshold.
    AccountLocked,
    /// An entity that must exist post-validation is missing. A defect, not a
    /// recoverable condition, but still answered safely.
    NotFound,
    /// Backing store failure; surfaces as 5xx.
    Storage(anyhow::Error),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Validation(msg) => write!(f, "{}", msg),
            AuthError::DuplicateIdentity => write!(f, "Email already registered"),
            AuthError::InvalidCredentials => write!(f, "Invalid email or password"),
            AuthError::AccountLocked => write!(f, "Account is locked"),
            AuthError::NotFound => write!(f, "Referenced entity not found"),
            AuthError::Storage(e) => write!(f, "Storage failure: {}", e),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<anyhow::Error> for AuthError {
    fn from(e: anyhow::Error) -> Self {
        AuthError::Storage(e)
    }
}

/// Orchestrates the credential store, token ledger, codec, and lockout policy
/// into the user-facing operations. Owns the cross-entity flow but persists
/// nothing itself.
pub struct AuthEngine {
    users: Arc<UserStore>,
    tokens: Arc<TokenLedger>,
    codec: Arc<JwtCodec>,
    lockout: LockoutPolicy,
    notifier: Arc<dyn AuthEventNotifier>,
    audit: Arc<AuditTrail>,
}

impl AuthEngine {
    pub fn new(
        users: Arc<UserStore>,
        tokens: Arc<TokenLedger>,
        codec: Arc<JwtCodec>,
        lockout: LockoutPolicy,
        notifier: Arc<dyn AuthEventNotifier>,
        audit: Arc<AuditTrail>,
    ) -> Self {
        Self {
            users,
            tokens,
            codec,
            lockout,
            notifier,
            audit,
        }
    }

    pub async fn register(
        &self,
        request: RegisterRequest,
        meta: &ClientMeta,
    ) -> Result<AuthSession, AuthError> {
        let email = normalize_email(&request.email);
        if !email_is_well_formed(&email) {
            return Err(AuthError::Validation("Invalid email address".to_string()));
        }
        if request.password.is_empty() {
            return Err(AuthError::Validation("Password must not be empty".to_string()));
        }

        // Advisory check; the store's unique index resolves the race.
        if self.users.exists_by_email(&email)? {
            return Err(AuthError::DuplicateIdentity);
        }

        let password_hash = hash(&request.password, DEFAULT_COST)
            .context("Failed to hash password")?;
        let user = User::new(email, request.first_name, request.last_name, password_hash);

        if !self.users.insert(&user)? {
            // Lost the race to a concurrent registration.
            return Err(AuthError::DuplicateIdentity);
        }

        let session = self.open_session(&user, meta, false)?;

        info!("✅ Registered user: {}", user.email);
        self.publish(EVENT_USER_REGISTERED, &user);
        self.audit_log(
            AuditEntry::new(user.id, AuditAction::Register, "account created".to_string())
                .with_client(meta.ip_address.clone(), meta.user_agent.clone()),
        );

        Ok(session)
    }

    pub async fn login(
        &self,
        request: LoginRequest,
        meta: &ClientMeta,
    ) -> Result<AuthSession, AuthError> {
        let email = normalize_email(&request.email);

        let Some(user) = self.users.find_by_email(&email)? else {
            // No identity record, so no lockout accounting to do. The caller
            // still sees the same generic failure as a wrong password.
            debug!("Login attempt for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        // Locked accounts are rejected before the password check, so the
        // counter cannot grow and timing reveals nothing.
        if user.account_locked {
            warn!("🔒 Login attempt against locked account: {}", user.email);
            return Err(AuthError::AccountLocked);
        }

        if !user.enabled {
            return Err(AuthError::InvalidCredentials);
        }

        let password_ok = verify(&request.password, &user.password_hash)
            .context("Failed to verify password")?;

        if !password_ok {
            self.handle_failed_login(&user, meta)?;
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        self.users.record_login_success(&user.id, now)?;

        let session = self.open_session(&user, meta, true)?;

        info!("✅ Login successful: {}", user.email);
        self.publish(EVENT_USER_LOGIN, &user);
        self.audit_log(
            AuditEntry::new(user.id, AuditAction::Login, "login".to_string())
                .with_client(meta.ip_address.clone(), meta.user_agent.clone()),
        );

        Ok(session)
    }

    /// Revoke a single token by its raw string. Unknown tokens are a no-op.
    pub async fn logout(&self, raw_token: &str, meta: &ClientMeta) -> Result<(), AuthError> {
        let Some(record) = self.tokens.find_by_raw(raw_token)? else {
            return Ok(());
        };

        self.tokens.revoke(raw_token, Utc::now())?;
        info!("Logout: revoked token for user {}", record.user_id);
        self.audit_log(
            AuditEntry::new(record.user_id, AuditAction::Logout, "logout".to_string())
                .with_client(meta.ip_address.clone(), meta.user_agent.clone()),
        );
        Ok(())
    }

    /// Mint both tokens and activate the access token in the ledger.
    /// Revoke-then-issue: all previously live tokens are revoked before the
    /// new record goes in, so a crash in between fails closed.
    fn open_session(
        &self,
        user: &User,
        meta: &ClientMeta,
        revoke_previous: bool,
    ) -> Result<AuthSession, AuthError> {
        let access_token = self.codec.issue_access_token(user)?;
        let refresh_token = self.codec.issue_refresh_token(user)?;

        if revoke_previous {
            let revoked = self.tokens.revoke_all_for_user(&user.id, Utc::now())?;
            if revoked > 0 {
                debug!("Revoked {} previous tokens for {}", revoked, user.email);
            }
        }

        self.tokens
            .insert(&TokenRecord::new(access_token.clone(), user.id, meta))?;

        Ok(AuthSession {
            user_id: user.id,
            access_token,
            refresh_token,
            token_type: crate::auth::models::TokenKind::Bearer,
            expires_in: self.codec.expires_in_secs(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        })
    }

    /// Failure accounting runs even though the caller only ever sees the
    /// generic invalid-credentials error.
    fn handle_failed_login(&self, user: &User, meta: &ClientMeta) -> Result<(), AuthError> {
        let decision = self.lockout.after_failure(user.failed_attempts);
        let now = Utc::now();
        self.users
            .record_login_failure(&user.id, decision.attempts(), decision.locks(), now)?;

        if decision.locks() {
            warn!(
                "🔒 Account locked after {} failed attempts: {}",
                decision.attempts(),
                user.email
            );
            self.audit_log(
                AuditEntry::new(
                    user.id,
                    AuditAction::AccountLock,
                    format!("locked after {} failed attempts", decision.attempts()),
                )
                .with_client(meta.ip_address.clone(), meta.user_agent.clone()),
            );
        } else {
            debug!(
                "Failed login {}/{} for {}",
                decision.attempts(),
                self.lockout.threshold(),
                user.email
            );
        }
        Ok(())
    }

    /// Fire-and-forget: a dead notifier must never fail the auth operation.
    fn publish(&self, event_type: &str, user: &User) {
        let event = AuthEvent::new(
            event_type,
            user.id.to_string(),
            user.email.clone(),
            user.first_name.clone(),
            user.last_name.clone(),
        );
        let notifier = self.notifier.clone();
        tokio::spawn(async move { notifier.publish(event).await });
    }

    fn audit_log(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(&entry) {
            warn!("Failed to write audit entry: {}", e);
        }
    }
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn email_is_well_formed(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::events::LogNotifier;
    use crate::auth::lockout::DEFAULT_LOCKOUT_THRESHOLD;
    use tempfile::TempDir;

    struct Harness {
        engine: AuthEngine,
        users: Arc<UserStore>,
        tokens: Arc<TokenLedger>,
        codec: Arc<JwtCodec>,
        audit: Arc<AuditTrail>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let path = |name: &str| dir.path().join(name).to_str().unwrap().to_string();

        let users = Arc::new(UserStore::new(&path("users.db")).unwrap());
        let tokens = Arc::new(TokenLedger::new(&path("tokens.db")).unwrap());
        let audit = Arc::new(AuditTrail::new(&path("audit.db")).unwrap());
        let codec = Arc::new(JwtCodec::new("test-secret".to_string(), 900, 604_800));

        let engine = AuthEngine::new(
            users.clone(),
            tokens.clone(),
            codec.clone(),
            LockoutPolicy::default(),
            Arc::new(LogNotifier),
            audit.clone(),
        );

        Harness {
            engine,
            users,
            tokens,
            codec,
            audit,
            _dir: dir,
        }
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "hunter22".to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_issues_token_for_created_user() {
        let h = harness();
        let session = h
            .engine
            .register(register_request("alice@example.com"), &ClientMeta::default())
            .await
            .unwrap();

        // Subject decodes to the created user's id
        let claims = h.codec.parse_and_verify(&session.access_token).unwrap();
        let stored = h.users.find_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(claims.sub, stored.id.to_string());

        // expiresIn equals the configured TTL exactly
        assert_eq!(session.expires_in, 900);

        // The access token is ledger-backed and live; the refresh token is not persisted
        assert!(h.tokens.is_live(&session.access_token).unwrap());
        assert!(h.tokens.find_by_raw(&session.refresh_token).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_normalizes_email() {
        let h = harness();
        h.engine
            .register(register_request("  Bob@Example.COM "), &ClientMeta::default())
            .await
            .unwrap();

        assert!(h.users.exists_by_email("bob@example.com").unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let h = harness();
        h.engine
            .register(register_request("carol@example.com"), &ClientMeta::default())
            .await
            .unwrap();

        let err = h
            .engine
            .register(register_request("carol@example.com"), &ClientMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateIdentity));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let h = harness();

        assert!(matches!(
            h.engine
                .register(register_request("not-an-email"), &ClientMeta::default())
                .await,
            Err(AuthError::Validation(_))
        ));

        let mut empty_password = register_request("ok@example.com");
        empty_password.password = String::new();
        assert!(matches!(
            h.engine.register(empty_password, &ClientMeta::default()).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_login_revokes_previous_tokens() {
        let h = harness();
        let meta = ClientMeta::default();
        let first = h
            .engine
            .register(register_request("dave@example.com"), &meta)
            .await
            .unwrap();
        let second = h
            .engine
            .login(login_request("dave@example.com", "hunter22"), &meta)
            .await
            .unwrap();

        // All pre-login tokens are revoked AND expired
        let old = h.tokens.find_by_raw(&first.access_token).unwrap().unwrap();
        assert!(old.revoked);
        assert!(old.expired);

        // Exactly one live token remains: the new one
        let live = h.tokens.find_all_live_for_user(&second.user_id).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].token, second.access_token);
    }

    #[tokio::test]
    async fn test_login_unknown_email_is_invalid_credentials() {
        let h = harness();
        let err = h
            .engine
            .login(login_request("ghost@example.com", "whatever"), &ClientMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_login_success_resets_failure_counter() {
        let h = harness();
        let meta = ClientMeta::default();
        h.engine
            .register(register_request("erin@example.com"), &meta)
            .await
            .unwrap();

        for _ in 0..2 {
            let err = h
                .engine
                .login(login_request("erin@example.com", "wrong"), &meta)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }

        let before = h.users.find_by_email("erin@example.com").unwrap().unwrap();
        assert_eq!(before.failed_attempts, 2);

        h.engine
            .login(login_request("erin@example.com", "hunter22"), &meta)
            .await
            .unwrap();

        let after = h.users.find_by_email("erin@example.com").unwrap().unwrap();
        assert_eq!(after.failed_attempts, 0);
        assert!(after.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_five_failures_lock_and_correct_password_then_fails() {
        let h = harness();
        let meta = ClientMeta::default();
        h.engine
            .register(register_request("frank@example.com"), &meta)
            .await
            .unwrap();

        for _ in 0..DEFAULT_LOCKOUT_THRESHOLD {
            let err = h
                .engine
                .login(login_request("frank@example.com", "wrong"), &meta)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }

        let user = h.users.find_by_email("frank@example.com").unwrap().unwrap();
        assert!(user.account_locked);
        assert_eq!(user.failed_attempts, DEFAULT_LOCKOUT_THRESHOLD);
        assert!(user.lock_time.is_some());

        // Sixth attempt with the CORRECT password still fails: lockout gates entry
        let err = h
            .engine
            .login(login_request("frank@example.com", "hunter22"), &meta)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked));

        // Counter did not advance past the threshold
        let user = h.users.find_by_email("frank@example.com").unwrap().unwrap();
        assert_eq!(user.failed_attempts, DEFAULT_LOCKOUT_THRESHOLD);

        // The lock transition left an audit row
        let entries = h.audit.recent_for_user(&user.id, 20).unwrap();
        assert!(entries.iter().any(|e| e.action == AuditAction::AccountLock));
    }

    #[tokio::test]
    async fn test_logout_revokes_and_is_idempotent() {
        let h = harness();
        let meta = ClientMeta::default();
        let session = h
            .engine
            .register(register_request("grace@example.com"), &meta)
            .await
            .unwrap();

        h.engine.logout(&session.access_token, &meta).await.unwrap();
        assert!(!h.tokens.is_live(&session.access_token).unwrap());

        // Second logout and unknown-token logout are no-ops
        h.engine.logout(&session.access_token, &meta).await.unwrap();
        h.engine.logout("never-issued", &meta).await.unwrap();
    }

    #[test]
    fn test_email_well_formedness() {
        assert!(email_is_well_formed("a@b.com"));
        assert!(!email_is_well_formed("plain"));
        assert!(!email_is_well_formed("@nodomain"));
        assert!(!email_is_well_formed("nolocal@"));
        assert!(!email_is_well_formed("two@@ats"));
    }
}
