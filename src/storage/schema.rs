use anyhow::Result;
use rusqlite::Connection;

pub const RECORDS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    owner_key TEXT NOT NULL,
    period_key TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub const SUBJECTS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS subjects (
    id TEXT PRIMARY KEY,
    secret TEXT NOT NULL,
    record_limit INTEGER NOT NULL
);
"#;

pub const RECORDS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_records_owner_period ON records(owner_key, period_key);
"#;

pub fn init_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(RECORDS_TABLE_SCHEMA)?;
    conn.execute_batch(SUBJECTS_TABLE_SCHEMA)?;
    conn.execute_batch(RECORDS_INDEXES)?;
    Ok(())
}
