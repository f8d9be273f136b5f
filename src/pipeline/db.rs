//! SQLite persistence for minute records and abnormal events
//!
//! Tables (see `/sql/`):
//! - `minute_records` - UPSERT on (subject_id, bucket_start_ms)
//! - `abnormal_events` - INSERT OR IGNORE on (subject_id, timestamp_ms, signal_type)
//!
//! Both writes are idempotent, so a batch retried after a partial failure
//! never duplicates rows.

use super::types::{AbnormalEvent, MinuteRecord, SignalType};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

pub type DbResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[async_trait]
pub trait VitalsDbWriter: Send + Sync {
    /// Upsert closed minute records
    async fn write_minute_records(&self, records: Vec<MinuteRecord>) -> DbResult<()>;

    /// Insert abnormal events, ignoring ones already stored
    async fn write_abnormal_events(&self, events: Vec<AbnormalEvent>) -> DbResult<()>;
}

/// Run schema migrations from SQL files
///
/// Executes every `.sql` file in `schema_dir` in file-name order. The files
/// use `IF NOT EXISTS`, so running this on every start is safe.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> DbResult<()> {
    let schema_path = Path::new(schema_dir);
    if !schema_path.exists() {
        return Err(format!("Schema directory not found: {}", schema_dir).into());
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    sql_files.sort();

    log::info!("🔧 Running schema migrations from: {}", schema_dir);
    for path in sql_files {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        log::info!("   ├─ Executing: {}", filename);
        conn.execute_batch(&fs::read_to_string(&path)?)?;
    }
    log::info!("✅ All schema migrations completed successfully");

    Ok(())
}

pub struct SqliteVitalsWriter {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVitalsWriter {
    /// Open a writer on an existing database
    ///
    /// The schema must already be in place (`run_schema_migrations`).
    pub fn new(db_path: &str) -> DbResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl VitalsDbWriter for SqliteVitalsWriter {
    async fn write_minute_records(&self, records: Vec<MinuteRecord>) -> DbResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO minute_records (
                    subject_id, bucket_start_ms,
                    temperature, heart_rate, resp_rate, systolic_bp, diastolic_bp,
                    sample_count, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(subject_id, bucket_start_ms) DO UPDATE SET
                    temperature = excluded.temperature,
                    heart_rate = excluded.heart_rate,
                    resp_rate = excluded.resp_rate,
                    systolic_bp = excluded.systolic_bp,
                    diastolic_bp = excluded.diastolic_bp,
                    sample_count = excluded.sample_count,
                    updated_at = excluded.updated_at
                "#,
            )?;

            for record in &records {
                let avg = &record.averages;
                stmt.execute(params![
                    record.subject_id,
                    record.bucket_start_ms,
                    avg[SignalType::Temperature],
                    avg[SignalType::HeartRate],
                    avg[SignalType::RespRate],
                    avg[SignalType::SystolicBp],
                    avg[SignalType::DiastolicBp],
                    record.sample_count,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    async fn write_abnormal_events(&self, events: Vec<AbnormalEvent>) -> DbResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT OR IGNORE INTO abnormal_events (
                    subject_id, timestamp_ms, signal_type, severity, value, created_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )?;

            for event in &events {
                inserted += stmt.execute(params![
                    event.subject_id,
                    event.timestamp_ms,
                    event.signal_type.as_str(),
                    event.severity.as_str(),
                    event.value,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        if inserted < events.len() {
            log::debug!(
                "Skipped {} abnormal events already stored",
                events.len() - inserted
            );
        }
        Ok(())
    }
}
