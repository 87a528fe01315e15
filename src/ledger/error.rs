use std::path::PathBuf;

use thiserror::Error;

/// Failures of the SQLite file shared by the ledger and the connection store.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Cannot open database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Pragmas or schema DDL failed while preparing the file.
    #[error("Schema setup failed: {0}")]
    Migration(#[from] rusqlite::Error),

    #[error("Ledger {operation} failed: {source}")]
    Query {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A thread panicked while holding the connection; its write may be
    /// half-applied, so the handle is not reused.
    #[error("Database handle poisoned by a panicked writer")]
    Poisoned,

    #[error("Blocking open task failed: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    #[error("Database schema v{found} was written by a newer immich-sync (this build knows v{expected})")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl LedgerError {
    /// Error mapper tagging a failed statement with the ledger operation.
    pub(crate) fn query(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Query { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_query_keeps_sqlite_source() {
        let e = LedgerError::query("record")(rusqlite::Error::QueryReturnedNoRows);
        assert!(e.to_string().starts_with("Ledger record failed"));
        assert!(e.source().is_some());
    }

    #[test]
    fn test_unsupported_version_message() {
        let e = LedgerError::UnsupportedSchemaVersion {
            found: 3,
            expected: 1,
        };
        assert_eq!(
            e.to_string(),
            "Database schema v3 was written by a newer immich-sync (this build knows v1)"
        );
    }
}
