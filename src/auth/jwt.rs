//! JWT Token Codec
//! Mission: Mint and verify signed, expiring bearer tokens

use crate::auth::models::{Claims, User};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

/// Why a token failed codec-level verification. Liveness (revocation) is the
/// ledger's concern; the codec only sees signature and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenParseError {
    Expired,
    Invalid,
}

impl std::fmt::Display for TokenParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenParseError::Expired => write!(f, "Token has expired"),
            TokenParseError::Invalid => write!(f, "Invalid token"),
        }
    }
}

impl std::error::Error for TokenParseError {}

/// Codec for self-contained signed tokens (subject, issued-at, expiry, claims).
/// Verification needs no external state; revocation checks do.
pub struct JwtCodec {
    secret: String,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl JwtCodec {
    pub fn new(secret: String, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        Self {
            secret,
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    /// The value callers must report as `expiresIn`, in seconds.
    pub fn expires_in_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    /// Short-lived token authorizing individual requests.
    pub fn issue_access_token(&self, user: &User) -> Result<String> {
        self.issue(user, self.access_ttl_secs)
    }

    /// Long-lived token for minting new access tokens without a password.
    pub fn issue_refresh_token(&self, user: &User) -> Result<String> {
        self.issue(user, self.refresh_ttl_secs)
    }

    fn issue(&self, user: &User, ttl_secs: u64) -> Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl_secs as usize,
        };

        debug!(
            "Issuing token for user {} ({}), ttl {}s",
            user.email, user.id, ttl_secs
        );

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to encode JWT")
    }

    /// Verify signature and wall-clock expiry, returning the claims.
    pub fn parse_and_verify(&self, token: &str) -> Result<Claims, TokenParseError> {
        // No leeway: a token is expired strictly after its TTL elapses.
        let mut validation = Validation::default();
        validation.leeway = 0;

        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(TokenParseError::Expired),
                _ => Err(TokenParseError::Invalid),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::Role;

    fn test_user() -> User {
        User::new(
            "testuser@example.com".to_string(),
            "Test".to_string(),
            "User".to_string(),
            "hash".to_string(),
        )
    }

    fn test_codec() -> JwtCodec {
        JwtCodec::new("test-secret-key-12345".to_string(), 900, 604_800)
    }

    #[test]
    fn test_round_trip_preserves_subject_and_claims() {
        let codec = test_codec();
        let user = test_user();

        let token = codec.issue_access_token(&user).unwrap();
        assert!(!token.is_empty());

        let claims = codec.parse_and_verify(&token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, Role::User);
        assert_eq!(claims.exp, claims.iat + 900);
    }

    #[test]
    fn test_expires_in_matches_configured_ttl() {
        let codec = JwtCodec::new("secret".to_string(), 1234, 604_800);
        assert_eq!(codec.expires_in_secs(), 1234);
    }

    #[test]
    fn test_expired_token_rejected_as_expired() {
        let codec = test_codec();
        let user = test_user();

        // Hand-encode claims whose expiry is already in the past.
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            jti: "test-jti".to_string(),
            iat: now - 1000,
            exp: now - 100,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret("test-secret-key-12345".as_bytes()),
        )
        .unwrap();

        assert_eq!(
            codec.parse_and_verify(&token),
            Err(TokenParseError::Expired)
        );
    }

    #[test]
    fn test_garbage_token_rejected_as_invalid() {
        let codec = test_codec();
        assert_eq!(
            codec.parse_and_verify("not.a.token"),
            Err(TokenParseError::Invalid)
        );
    }

    #[test]
    fn test_different_secrets_reject() {
        let codec1 = JwtCodec::new("secret1".to_string(), 900, 604_800);
        let codec2 = JwtCodec::new("secret2".to_string(), 900, 604_800);
        let user = test_user();

        let token = codec1.issue_access_token(&user).unwrap();
        assert_eq!(
            codec2.parse_and_verify(&token),
            Err(TokenParseError::Invalid)
        );
    }

    #[test]
    fn test_refresh_token_outlives_access_token() {
        let codec = test_codec();
        let user = test_user();

        let access = codec.parse_and_verify(&codec.issue_access_token(&user).unwrap()).unwrap();
        let refresh = codec.parse_and_verify(&codec.issue_refresh_token(&user).unwrap()).unwrap();
        assert!(refresh.exp > access.exp);
    }
}
