//! Ledger trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::LedgerError;
use super::schema;
use super::types::{LedgerEntry, LedgerSummary};

/// Persistent record of which assets have already been downloaded.
///
/// Object-safe so the engine can hold an `Arc<dyn Ledger>`. The engine only
/// ever calls `contains` and `record`; `reset` is the administrative path.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Whether an entry exists for `asset_id`.
    async fn contains(&self, asset_id: &str) -> Result<bool, LedgerError>;

    /// Insert or replace the entry keyed by `entry.id`. Last write wins.
    async fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// Fetch the entry for `asset_id`, if any.
    async fn get(&self, asset_id: &str) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Entry count and most recent write time.
    async fn summary(&self) -> Result<LedgerSummary, LedgerError>;

    /// Remove every entry. Returns the number removed.
    async fn reset(&self) -> Result<u64, LedgerError>;
}

/// Open a SQLite connection in WAL mode and bring the schema up to date.
pub(crate) fn open_connection(path: &Path) -> Result<Connection, LedgerError> {
    let conn = Connection::open(path).map_err(|e| LedgerError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;

    // WAL lets `status` read while a sync run is writing.
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(LedgerError::Migration)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(LedgerError::Migration)?;

    schema::migrate(&conn)?;
    Ok(conn)
}

/// SQLite implementation of the ledger.
pub struct SqliteLedger {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteLedger {
    /// Open or create a ledger at the given path.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || open_connection(&path_clone)).await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory ledger (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(|e| LedgerError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn contains(&self, asset_id: &str) -> Result<bool, LedgerError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM synced_assets WHERE id = ?1",
                [asset_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(LedgerError::query("contains"))?;
        Ok(found.is_some())
    }

    async fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO synced_assets (id, original_file_name, local_path, checksum, synced_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                original_file_name = excluded.original_file_name,
                local_path = excluded.local_path,
                checksum = excluded.checksum,
                synced_at = excluded.synced_at
            "#,
            rusqlite::params![
                &entry.id,
                &entry.original_file_name,
                entry.local_path.to_string_lossy(),
                &entry.checksum,
                entry.synced_at.timestamp_millis(),
            ],
        )
        .map_err(LedgerError::query("record"))?;
        Ok(())
    }

    async fn get(&self, asset_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, original_file_name, local_path, checksum, synced_at FROM synced_assets WHERE id = ?1",
            [asset_id],
            row_to_entry,
        )
        .optional()
        .map_err(LedgerError::query("get"))
    }

    async fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        let conn = self.lock()?;
        let (total, last): (i64, Option<i64>) = conn
            .query_row(
                "SELECT COUNT(*), MAX(synced_at) FROM synced_assets",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(LedgerError::query("summary"))?;

        Ok(LedgerSummary {
            total_entries: total as u64,
            last_synced_at: last.and_then(millis_to_datetime),
        })
    }

    async fn reset(&self) -> Result<u64, LedgerError> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM synced_assets", [])
            .map_err(LedgerError::query("reset"))?;
        tracing::info!(removed, "Ledger reset");
        Ok(removed as u64)
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let local_path: String = row.get(2)?;
    let synced_at: i64 = row.get(4)?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        original_file_name: row.get(1)?,
        local_path: PathBuf::from(local_path),
        checksum: row.get(3)?,
        synced_at: millis_to_datetime(synced_at).unwrap_or(DateTime::UNIX_EPOCH),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, name: &str) -> LedgerEntry {
        LedgerEntry::new(
            id.to_string(),
            name.to_string(),
            PathBuf::from("/photos").join(name),
            Some(format!("ck-{}", id)),
        )
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let ledger = SqliteLedger::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(ledger.path(), path);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = SqliteLedger::open(&path).await.unwrap();
            ledger.record(&entry("a1", "x.jpg")).await.unwrap();
        }
        let ledger = SqliteLedger::open(&path).await.unwrap();
        assert!(ledger.contains("a1").await.unwrap());
    }

    #[tokio::test]
    async fn test_contains_unknown() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        assert!(!ledger.contains("nope").await.unwrap());
        assert!(ledger.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_then_get() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let e = entry("a1", "x.jpg");
        ledger.record(&e).await.unwrap();

        assert!(ledger.contains("a1").await.unwrap());
        let stored = ledger.get("a1").await.unwrap().unwrap();
        assert_eq!(stored.id, "a1");
        assert_eq!(stored.original_file_name, "x.jpg");
        assert_eq!(stored.local_path, PathBuf::from("/photos/x.jpg"));
        assert_eq!(stored.checksum.as_deref(), Some("ck-a1"));
        assert_eq!(
            stored.synced_at.timestamp_millis(),
            e.synced_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_record_without_checksum() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let mut e = entry("a2", "y.jpg");
        e.checksum = None;
        ledger.record(&e).await.unwrap();
        assert!(ledger.get("a2").await.unwrap().unwrap().checksum.is_none());
    }

    #[tokio::test]
    async fn test_record_twice_last_write_wins() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.record(&entry("a1", "x.jpg")).await.unwrap();
        let mut second = entry("a1", "renamed.jpg");
        second.checksum = Some("new".to_string());
        ledger.record(&second).await.unwrap();

        let stored = ledger.get("a1").await.unwrap().unwrap();
        assert_eq!(stored.original_file_name, "renamed.jpg");
        assert_eq!(stored.checksum.as_deref(), Some("new"));
        assert_eq!(ledger.summary().await.unwrap().total_entries, 1);
    }

    #[tokio::test]
    async fn test_summary_empty() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let summary = ledger.summary().await.unwrap();
        assert_eq!(summary, LedgerSummary::default());
    }

    #[tokio::test]
    async fn test_summary_reports_latest_write() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let mut older = entry("a1", "x.jpg");
        older.synced_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut newer = entry("a2", "y.jpg");
        newer.synced_at = Utc.timestamp_opt(1_800_000_000, 0).unwrap();
        ledger.record(&newer).await.unwrap();
        ledger.record(&older).await.unwrap();

        let summary = ledger.summary().await.unwrap();
        assert_eq!(summary.total_entries, 2);
        assert_eq!(summary.last_synced_at, Some(newer.synced_at));
    }

    #[tokio::test]
    async fn test_reset_clears_entries() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.record(&entry("a1", "x.jpg")).await.unwrap();
        ledger.record(&entry("a2", "y.jpg")).await.unwrap();

        assert_eq!(ledger.reset().await.unwrap(), 2);
        assert!(!ledger.contains("a1").await.unwrap());
        assert_eq!(ledger.summary().await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_poisoned_handle_reported() {
        let ledger = std::sync::Arc::new(SqliteLedger::open_in_memory().unwrap());
        let writer = ledger.clone();
        let _ = std::thread::spawn(move || {
            let _conn = writer.conn.lock().unwrap();
            panic!("writer died mid-transaction");
        })
        .join();

        assert!(matches!(
            ledger.contains("a1").await,
            Err(LedgerError::Poisoned)
        ));
        assert!(matches!(
            ledger.record(&entry("a1", "x.jpg")).await,
            Err(LedgerError::Poisoned)
        ));
    }
}
