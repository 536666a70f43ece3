//! Credential Store
//! Mission: Persist user identity records with SQLite

use crate::auth::models::{Role, User};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Uniqueness of email lives here, in the schema, not in the entity.
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    account_locked INTEGER NOT NULL DEFAULT 0,
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    lock_time TEXT,
    last_login_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email);
CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
"#;

/// User storage with SQLite backend
pub struct UserStore {
    conn: Arc<Mutex<Connection>>,
}

impl UserStore {
    /// Open (or create) the store and apply the schema.
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open user database at {}", db_path))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply user schema")?;

        info!("👤 User store ready at {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a new user. Returns Ok(false) when the unique email index
    /// rejects the row - the store is the true duplicate guard, the engine's
    /// existence check is advisory only.
    pub fn insert(&self, user: &User) -> Result<bool> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (id, email, first_name, last_name, password_hash, role,
                                enabled, account_locked, failed_attempts, lock_time,
                                last_login_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                user.id.to_string(),
                user.email,
                user.first_name,
                user.last_name,
                user.password_hash,
                user.role.as_str(),
                user.enabled,
                user.account_locked,
                user.failed_attempts,
                user.lock_time.map(|t| t.to_rfc3339()),
                user.last_login_at.map(|t| t.to_rfc3339()),
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e).context("Failed to insert user"),
        }
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, email, first_name, last_name, password_hash, role, enabled,
                    account_locked, failed_attempts, lock_time, last_login_at,
                    created_at, updated_at
             FROM users WHERE email = ?1",
        )?;

        match stmt.query_row(params![email], row_to_user) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, email, first_name, last_name, password_hash, role, enabled,
                    account_locked, failed_attempts, lock_time, last_login_at,
                    created_at, updated_at
             FROM users WHERE id = ?1",
        )?;

        match stmt.query_row(params![id.to_string()], row_to_user) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists_by_email(&self, email: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            params![email],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Successful login: counter back to zero, last-login stamped.
    /// The locked flag is not touched here - unlocking is an admin action.
    pub fn record_login_success(&self, id: &Uuid, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET failed_attempts = 0, last_login_at = ?2, updated_at = ?2
             WHERE id = ?1",
            params![id.to_string(), now.to_rfc3339()],
        )
        .context("Failed to record login success")?;
        Ok(())
    }

    /// Failed login: persist the advanced counter, and when the lockout policy
    /// says so, flip the locked flag and stamp the lock time.
    pub fn record_login_failure(
        &self,
        id: &Uuid,
        failed_attempts: u32,
        lock: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        if lock {
            conn.execute(
                "UPDATE users SET failed_attempts = ?2, account_locked = 1,
                        lock_time = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![id.to_string(), failed_attempts, now.to_rfc3339()],
            )
        } else {
            conn.execute(
                "UPDATE users SET failed_attempts = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id.to_string(), failed_attempts, now.to_rfc3339()],
            )
        }
        .context("Failed to record login failure")?;
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(5)?;
    Ok(User {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        password_hash: row.get(4)?,
        role: Role::from_str(&role_str).unwrap_or(Role::User),
        enabled: row.get(6)?,
        account_locked: row.get(7)?,
        failed_attempts: row.get(8)?,
        lock_time: parse_opt_timestamp(row.get(9)?),
        last_login_at: parse_opt_timestamp(row.get(10)?),
        created_at: parse_timestamp(row.get(11)?),
        updated_at: parse_timestamp(row.get(12)?),
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
