//! Audit Trail
//! Mission: Append-only record of security-relevant account actions

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS audit_logs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT NOT NULL,
    ip_address TEXT,
    user_agent TEXT,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_logs(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_logs(action);
"#;

/// Account actions worth an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Register,
    Login,
    Logout,
    AccountLock,
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            AuditAction::Register => "REGISTER",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::AccountLock => "ACCOUNT_LOCK",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "REGISTER" => Some(AuditAction::Register),
            "LOGIN" => Some(AuditAction::Login),
            "LOGOUT" => Some(AuditAction::Logout),
            "ACCOUNT_LOCK" => Some(AuditAction::AccountLock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: AuditAction,
    pub details: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(user_id: Uuid, action: AuditAction, details: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            action,
            details,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

/// SQLite-backed audit sink. Writes are best-effort at the call site: the
/// engine logs and swallows failures rather than failing the auth operation.
pub struct AuditTrail {
    conn: Arc<Mutex<Connection>>,
}

impl AuditTrail {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open audit database at {}", db_path))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply audit schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn record(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_logs (id, user_id, action, details, ip_address, user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id.to_string(),
                entry.user_id.to_string(),
                entry.action.as_str(),
                entry.details,
                entry.ip_address,
                entry.user_agent,
                entry.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert audit entry")?;
        Ok(())
    }

    pub fn recent_for_user(&self, user_id: &Uuid, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, action, details, ip_address, user_agent, created_at
             FROM audit_logs WHERE user_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![user_id.to_string(), limit as i64], |row| {
                let action_str: String = row.get(2)?;
                Ok(AuditEntry {
                    id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
                    user_id: Uuid::parse_str(&row.get::<_, String>(1)?).unwrap(),
                    action: AuditAction::from_str(&action_str).unwrap_or(AuditAction::Login),
                    details: row.get(3)?,
                    ip_address: row.get(4)?,
                    user_agent: row.get(5)?,
                    created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(6)?)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
