use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{Datelike, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::StorageError;
use super::schema::init_database;
use super::LEDGER_DB_FILENAME;

/// A quota-counted row. Immutable once inserted; only a successful
/// quota-enforced append creates one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub content: String,
    pub owner_key: String,
    pub period_key: String,
    pub created_at: String,
}

impl Record {
    pub fn new(
        content: impl Into<String>,
        owner_key: impl Into<String>,
        period_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            owner_key: owner_key.into(),
            period_key: period_key.into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSubject {
    pub id: String,
    pub secret: String,
    pub record_limit: u64,
}

/// Adapter over the shared relational store. Holds only the database path;
/// every append call gets its own connection so concurrent enforcers never
/// share a transaction resource.
pub struct RecordStore {
    db_path: PathBuf,
}

/// How long a blocking connection waits for the store's writer lock before
/// reporting a fault.
const WRITER_WAIT: Duration = Duration::from_secs(5);

impl RecordStore {
    pub fn open(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(LEDGER_DB_FILENAME);

        let store = Self { db_path };
        let conn = store.connect_blocking()?;
        init_database(&conn)?;

        Ok(store)
    }

    /// Open a dedicated fail-fast connection: `busy_timeout` stays at zero
    /// so a write conflict surfaces as a busy error the enforcer can
    /// classify and retry, instead of blocking inside the driver. Only the
    /// serializable strategy wants this.
    pub fn connect(&self) -> Result<Connection, StorageError> {
        self.connect_with_busy_timeout(Duration::ZERO)
    }

    /// Open a dedicated connection that waits out transient writer
    /// contention. For callers outside the serializable strategy — the
    /// mutex-guarded append and the plain accessors — a busy store is other
    /// owners writing, not a conflict to classify.
    pub fn connect_blocking(&self) -> Result<Connection, StorageError> {
        self.connect_with_busy_timeout(WRITER_WAIT)
    }

    fn connect_with_busy_timeout(&self, timeout: Duration) -> Result<Connection, StorageError> {
        let conn = Connection::open(&self.db_path)?;
        // busy_timeout first: the journal_mode pragma reads the database
        // and must already honor the wait policy.
        conn.busy_timeout(timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    pub fn count_in_period(
        &self,
        conn: &Connection,
        owner_key: &str,
        period_key: &str,
    ) -> Result<u64, StorageError> {
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(id)
            FROM records
            WHERE owner_key = ?1 AND period_key = ?2
            "#,
            params![owner_key, period_key],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn insert_record(&self, conn: &Connection, record: &Record) -> Result<(), StorageError> {
        conn.execute(
            r#"
            INSERT INTO records (id, content, owner_key, period_key, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.id,
                record.content,
                record.owner_key,
                record.period_key,
                record.created_at
            ],
        )?;
        Ok(())
    }

    pub fn records_for(
        &self,
        owner_key: &str,
        period_key: &str,
    ) -> Result<Vec<Record>, StorageError> {
        let conn = self.connect_blocking()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, content, owner_key, period_key, created_at
            FROM records
            WHERE owner_key = ?1 AND period_key = ?2
            ORDER BY created_at
            "#,
        )?;

        let rows = stmt.query_map(params![owner_key, period_key], |row| {
            Ok(Record {
                id: row.get(0)?,
                content: row.get(1)?,
                owner_key: row.get(2)?,
                period_key: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn find_subject(&self, id: &str) -> Result<QuotaSubject, StorageError> {
        let conn = self.connect_blocking()?;
        let subject = conn
            .query_row(
                r#"
                SELECT id, secret, record_limit
                FROM subjects
                WHERE id = ?1
                "#,
                params![id],
                |row| {
                    Ok(QuotaSubject {
                        id: row.get(0)?,
                        secret: row.get(1)?,
                        record_limit: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()?;

        subject.ok_or_else(|| StorageError::SubjectNotFound(id.to_string()))
    }

    pub fn create_subject(&self, subject: &QuotaSubject) -> Result<(), StorageError> {
        let conn = self.connect_blocking()?;
        conn.execute(
            r#"
            INSERT INTO subjects (id, secret, record_limit)
            VALUES (?1, ?2, ?3)
            "#,
            params![subject.id, subject.secret, subject.record_limit as i64],
        )?;
        Ok(())
    }

    pub fn subject_limit(&self, id: &str) -> Result<u64, StorageError> {
        let conn = self.connect_blocking()?;
        let limit = conn
            .query_row(
                "SELECT record_limit FROM subjects WHERE id = ?1",
                params![id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        limit
            .map(|value| value as u64)
            .ok_or_else(|| StorageError::SubjectNotFound(id.to_string()))
    }
}

/// Calendar-day period marker for callers that window quotas per UTC day.
/// The store itself treats period keys as opaque equality-matched values.
pub fn utc_day_period() -> String {
    let now = Utc::now();
    format!("{:04}-{:02}-{:02}", now.year(), now.month(), now.day())
}
