//! Stored connection profiles.
//!
//! A connection bundles a server, API key, album and local directory. Several
//! can be stored; exactly one (or none) is active and supplies the config for
//! scheduled runs. Profiles live in the same SQLite file as the ledger.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection as SqlConnection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use crate::config::{mask_api_key, SyncConfig};
use crate::ledger::db::open_connection;
use crate::ledger::LedgerError;
use crate::sync::SyncRunResult;

#[derive(Error, Debug)]
pub enum ConnectionStoreError {
    /// Opening the shared database file failed, or its handle is poisoned.
    #[error(transparent)]
    Database(#[from] LedgerError),

    #[error("Connection store query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("No connection with id or name '{0}'")]
    NotFound(String),
}

/// One stored server/album/directory profile.
#[derive(Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub server_url: String,
    pub api_key: String,
    pub album_id: String,
    pub album_name: String,
    pub local_path: PathBuf,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub active: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("server_url", &self.server_url)
            .field("api_key", &mask_api_key(&self.api_key))
            .field("album_id", &self.album_id)
            .field("local_path", &self.local_path)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Snapshot of the fields a sync run needs.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            server_url: self.server_url.clone(),
            api_key: self.api_key.clone(),
            album_id: self.album_id.clone(),
            local_path: self.local_path.clone(),
        }
    }

    /// Whether a finished run counts as a sync of this connection. Only a
    /// completed run over exactly this connection's settings does; a run
    /// redirected by CLI overrides synced something else.
    pub fn was_synced_by(&self, ran: &SyncConfig, result: &SyncRunResult) -> bool {
        result.is_success() && self.sync_config() == *ran
    }
}

/// Fields supplied when adding a connection.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub name: String,
    pub server_url: String,
    pub api_key: String,
    pub album_id: String,
    pub album_name: String,
    pub local_path: PathBuf,
}

const SELECT_COLUMNS: &str = "SELECT id, name, server_url, api_key, album_id, album_name, local_path, last_sync_time, active FROM connections";

pub struct ConnectionStore {
    conn: Mutex<SqlConnection>,
}

impl ConnectionStore {
    pub fn open(path: &Path) -> Result<Self, ConnectionStoreError> {
        let conn = open_connection(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, ConnectionStoreError> {
        let conn = SqlConnection::open_in_memory()?;
        crate::ledger::schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SqlConnection>, ConnectionStoreError> {
        self.conn
            .lock()
            .map_err(|_| ConnectionStoreError::Database(LedgerError::Poisoned))
    }

    /// Store a new connection. The first connection becomes active, as does
    /// any connection added with `activate`.
    pub fn add(
        &self,
        new: NewConnection,
        activate: bool,
    ) -> Result<Connection, ConnectionStoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: i64 = tx.query_row("SELECT COUNT(*) FROM connections", [], |row| row.get(0))?;
        let active = activate || existing == 0;
        if active {
            tx.execute("UPDATE connections SET active = 0", [])?;
        }
        tx.execute(
            r#"
            INSERT INTO connections (id, name, server_url, api_key, album_id, album_name, local_path, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            rusqlite::params![
                &id,
                &new.name,
                &new.server_url,
                &new.api_key,
                &new.album_id,
                &new.album_name,
                new.local_path.to_string_lossy(),
                active,
                Utc::now().timestamp_millis(),
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            id = %id,
            name = %new.name,
            api_key = %mask_api_key(&new.api_key),
            active,
            "Stored connection"
        );

        Ok(Connection {
            id,
            name: new.name,
            server_url: new.server_url,
            api_key: new.api_key,
            album_id: new.album_id,
            album_name: new.album_name,
            local_path: new.local_path,
            last_sync_time: None,
            active,
        })
    }

    pub fn list(&self) -> Result<Vec<Connection>, ConnectionStoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY created_at, name", SELECT_COLUMNS))?;
        let connections = stmt
            .query_map([], row_to_connection)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(connections)
    }

    pub fn active(&self) -> Result<Option<Connection>, ConnectionStoreError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                &format!("{} WHERE active = 1", SELECT_COLUMNS),
                [],
                row_to_connection,
            )
            .optional()?;
        Ok(found)
    }

    /// Look up by exact id first, then by name.
    pub fn find(&self, id_or_name: &str) -> Result<Connection, ConnectionStoreError> {
        let conn = self.lock()?;
        find_in(&conn, id_or_name)
    }

    /// Make the given connection the only active one.
    pub fn set_active(&self, id_or_name: &str) -> Result<Connection, ConnectionStoreError> {
        let mut conn = self.lock()?;
        // Immediate: the lookup and both updates see the same rows even when
        // another process edits connections concurrently.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let target = find_in(&tx, id_or_name)?;
        tx.execute("UPDATE connections SET active = 0", [])?;
        let updated = tx.execute(
            "UPDATE connections SET active = 1 WHERE id = ?1",
            [&target.id],
        )?;
        if updated != 1 {
            return Err(ConnectionStoreError::NotFound(id_or_name.to_string()));
        }
        tx.commit()?;
        tracing::info!(id = %target.id, name = %target.name, "Active connection changed");
        Ok(Connection {
            active: true,
            ..target
        })
    }

    /// Delete a connection. Removing the active one leaves none active.
    pub fn remove(&self, id_or_name: &str) -> Result<Connection, ConnectionStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let target = find_in(&tx, id_or_name)?;
        let deleted = tx.execute("DELETE FROM connections WHERE id = ?1", [&target.id])?;
        if deleted != 1 {
            return Err(ConnectionStoreError::NotFound(id_or_name.to_string()));
        }
        tx.commit()?;
        tracing::info!(id = %target.id, name = %target.name, "Removed connection");
        Ok(target)
    }

    /// Stamp the last successful sync time on a connection.
    pub fn update_last_sync_time(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ConnectionStoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE connections SET last_sync_time = ?1 WHERE id = ?2",
            rusqlite::params![at.timestamp_millis(), id],
        )?;
        if updated == 0 {
            return Err(ConnectionStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn find_in(conn: &SqlConnection, id_or_name: &str) -> Result<Connection, ConnectionStoreError> {
    let by_id = conn
        .query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            [id_or_name],
            row_to_connection,
        )
        .optional()?;
    if let Some(found) = by_id {
        return Ok(found);
    }
    conn.query_row(
        &format!("{} WHERE name = ?1 ORDER BY created_at LIMIT 1", SELECT_COLUMNS),
        [id_or_name],
        row_to_connection,
    )
    .optional()?
    .ok_or_else(|| ConnectionStoreError::NotFound(id_or_name.to_string()))
}

fn row_to_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Connection> {
    let local_path: String = row.get(6)?;
    let last_sync_time: Option<i64> = row.get(7)?;
    Ok(Connection {
        id: row.get(0)?,
        name: row.get(1)?,
        server_url: row.get(2)?,
        api_key: row.get(3)?,
        album_id: row.get(4)?,
        album_name: row.get(5)?,
        local_path: PathBuf::from(local_path),
        last_sync_time: last_sync_time.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        active: row.get(8)?,
    })
}
