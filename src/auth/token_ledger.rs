//! Token Ledger
//! Mission: Keep a persisted record of every issued access token

use crate::auth::models::{TokenKind, TokenRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token TEXT NOT NULL,
    token_type TEXT NOT NULL DEFAULT 'Bearer',
    revoked INTEGER NOT NULL DEFAULT 0,
    expired INTEGER NOT NULL DEFAULT 0,
    user_id TEXT NOT NULL,
    user_agent TEXT,
    ip_address TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_used_at TEXT
) WITHOUT ROWID;

CREATE UNIQUE INDEX IF NOT EXISTS idx_tokens_token ON tokens(token);
CREATE INDEX IF NOT EXISTS idx_tokens_user_live ON tokens(user_id, revoked, expired);
CREATE INDEX IF NOT EXISTS idx_tokens_last_used ON tokens(last_used_at);
"#;

/// Ledger of issued tokens. Records are flipped to revoked/expired, never
/// deleted; physical cleanup belongs to an external batch job fed by the
/// maintenance queries below.
pub struct TokenLedger {
    conn: Arc<Mutex<Connection>>,
}

impl TokenLedger {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open token database at {}", db_path))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply token schema")?;

        info!("🎫 Token ledger ready at {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn insert(&self, record: &TokenRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tokens (id, token, token_type, revoked, expired, user_id,
                                 user_agent, ip_address, created_at, updated_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id.to_string(),
                record.token,
                record.kind.as_str(),
                record.revoked,
                record.expired,
                record.user_id.to_string(),
                record.user_agent,
                record.ip_address,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.last_used_at.map(|t| t.to_rfc3339()),
            ],
        )
        .context("Failed to insert token record")?;
        Ok(())
    }

    pub fn find_by_raw(&self, raw: &str) -> Result<Option<TokenRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, token, token_type, revoked, expired, user_id, user_agent,
                    ip_address, created_at, updated_at, last_used_at
             FROM tokens WHERE token = ?1",
        )?;

        match stmt.query_row(params![raw], row_to_record) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_all_live_for_user(&self, user_id: &Uuid) -> Result<Vec<TokenRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, token, token_type, revoked, expired, user_id, user_agent,
                    ip_address, created_at, updated_at, last_used_at
             FROM tokens WHERE user_id = ?1 AND revoked = 0 AND expired = 0",
        )?;

        let records = stmt
            .query_map(params![user_id.to_string()], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Batch-revoke every live token for a user. A single UPDATE statement, so
    /// a concurrent validation sees either the pre- or post-revocation state.
    /// A no-op (0 rows) when the user has no live tokens.
    pub fn revoke_all_for_user(&self, user_id: &Uuid, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let affected = conn
            .execute(
                "UPDATE tokens SET revoked = 1, expired = 1, updated_at = ?2
                 WHERE user_id = ?1 AND revoked = 0 AND expired = 0",
                params![user_id.to_string(), now.to_rfc3339()],
            )
            .context("Failed to revoke user tokens")?;
        Ok(affected)
    }

    /// Revoke a single token by its raw string (logout path). Missing records
    /// are a no-op; returns whether a row was touched.
    pub fn revoke(&self, raw: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        let affected = conn
            .execute(
                "UPDATE tokens SET revoked = 1, expired = 1, updated_at = ?2
                 WHERE token = ?1 AND (revoked = 0 OR expired = 0)",
                params![raw, now.to_rfc3339()],
            )
            .context("Failed to revoke token")?;
        Ok(affected > 0)
    }

    pub fn touch_last_used(&self, raw: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tokens SET last_used_at = ?2, updated_at = ?2 WHERE token = ?1",
            params![raw, now.to_rfc3339()],
        )
        .context("Failed to touch token")?;
        Ok(())
    }

    /// Live = a ledger record exists and is neither revoked nor expired.
    /// Absence of a record means not live.
    pub fn is_live(&self, raw: &str) -> Result<bool> {
        Ok(self.find_by_raw(raw)?.map(|r| r.is_live()).unwrap_or(false))
    }

    /// Tokens past their codec expiry but never explicitly revoked.
    /// Consumed by the external cleanup job.
    pub fn find_expired_unrevoked(&self) -> Result<Vec<TokenRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, token, token_type, revoked, expired, user_id, user_agent,
                    ip_address, created_at, updated_at, last_used_at
             FROM tokens WHERE expired = 1 AND revoked = 0",
        )?;

        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Tokens not used since the given threshold. Consumed by the external
    /// cleanup job.
    pub fn find_inactive_since(&self, threshold: DateTime<Utc>) -> Result<Vec<TokenRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, token, token_type, revoked, expired, user_id, user_agent,
                    ip_address, created_at, updated_at, last_used_at
             FROM tokens WHERE last_used_at IS NOT NULL AND last_used_at < ?1",
        )?;

        let records = stmt
            .query_map(params![threshold.to_rfc3339()], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TokenRecord> {
    Ok(TokenRecord {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
        token: row.get(1)?,
        kind: TokenKind::Bearer,
        revoked: row.get(3)?,
        expired: row.get(4)?,
        user_id: Uuid::parse_str(&row.get::<_, String>(5)?).unwrap(),
        user_agent: row.get(6)?,
        ip_address: row.get(7)?,
        created_at: parse_timestamp(row.get(8)?),
        updated_at: parse_timestamp(row.get(9)?),
        last_used_at: parse_opt_timestamp(row.get(10)?),
    })
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::ClientMeta;
    use tempfile::NamedTempFile;

    fn create_test_ledger() -> (TokenLedger, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let ledger = TokenLedger::new(temp_file.path().to_str().unwrap()).unwrap();
        (ledger, temp_file)
    }

    fn record_for(user_id: Uuid, raw: &str) -> TokenRecord {
        TokenRecord::new(raw.to_string(), user_id, &ClientMeta::default())
    }

    #[test]
    fn test_insert_and_find_by_raw() {
        let (ledger, _temp) = create_test_ledger();
        let user_id = Uuid::new_v4();

        ledger.insert(&record_for(user_id, "token-a")).unwrap();

        let found = ledger.find_by_raw("token-a").unwrap().unwrap();
        assert_eq!(found.user_id, user_id);
        assert!(found.is_live());
        assert!(ledger.find_by_raw("missing").unwrap().is_none());
    }

    #[test]
    fn test_revoke_all_marks_revoked_and_expired() {
        let (ledger, _temp) = create_test_ledger();
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        ledger.insert(&record_for(user_id, "token-a")).unwrap();
        ledger.insert(&record_for(user_id, "token-b")).unwrap();
        ledger.insert(&record_for(other, "token-c")).unwrap();

        let affected = ledger.revoke_all_for_user(&user_id, Utc::now()).unwrap();
        assert_eq!(affected, 2);

        for raw in ["token-a", "token-b"] {
            let record = ledger.find_by_raw(raw).unwrap().unwrap();
            assert!(record.revoked);
            assert!(record.expired);
        }

        // Other user's token untouched
        assert!(ledger.is_live("token-c").unwrap());
        assert!(ledger.find_all_live_for_user(&user_id).unwrap().is_empty());
    }

    #[test]
    fn test_revoke_all_is_idempotent_noop() {
        let (ledger, _temp) = create_test_ledger();
        let user_id = Uuid::new_v4();

        assert_eq!(ledger.revoke_all_for_user(&user_id, Utc::now()).unwrap(), 0);
        assert_eq!(ledger.revoke_all_for_user(&user_id, Utc::now()).unwrap(), 0);
    }

    #[test]
    fn test_single_revoke_for_logout() {
        let (ledger, _temp) = create_test_ledger();
        let user_id = Uuid::new_v4();
        ledger.insert(&record_for(user_id, "token-a")).unwrap();

        assert!(ledger.revoke("token-a", Utc::now()).unwrap());
        assert!(!ledger.is_live("token-a").unwrap());

        // Missing and already-revoked tokens are no-ops
        assert!(!ledger.revoke("token-a", Utc::now()).unwrap());
        assert!(!ledger.revoke("missing", Utc::now()).unwrap());
    }

    #[test]
    fn test_touch_last_used_and_inactive_query() {
        let (ledger, _temp) = create_test_ledger();
        let user_id = Uuid::new_v4();
        ledger.insert(&record_for(user_id, "token-a")).unwrap();

        let now = Utc::now();
        ledger.touch_last_used("token-a", now).unwrap();

        let found = ledger.find_by_raw("token-a").unwrap().unwrap();
        assert!(found.last_used_at.is_some());

        let inactive = ledger
            .find_inactive_since(now + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(inactive.len(), 1);
        assert!(ledger
            .find_inactive_since(now - chrono::Duration::hours(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_expired_unrevoked_query() {
        let (ledger, _temp) = create_test_ledger();
        let user_id = Uuid::new_v4();

        // A token past its codec expiry that nothing ever revoked explicitly
        let mut stale = record_for(user_id, "token-stale");
        stale.expired = true;
        ledger.insert(&stale).unwrap();
        ledger.insert(&record_for(user_id, "token-live")).unwrap();

        let found = ledger.find_expired_unrevoked().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].token, "token-stale");
    }

    #[test]
    fn test_absent_record_is_not_live() {
        let (ledger, _temp) = create_test_ledger();
        assert!(!ledger.is_live("never-issued").unwrap());
    }
}
