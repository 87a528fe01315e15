use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// A downloaded asset as remembered by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Immich asset ID (primary key).
    pub id: String,
    /// Filename reported by the server.
    pub original_file_name: String,
    /// Where the file was written.
    pub local_path: PathBuf,
    /// Server checksum at download time, kept for reference only.
    pub checksum: Option<String>,
    /// When the entry was written, not when the asset was created.
    pub synced_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        id: String,
        original_file_name: String,
        local_path: PathBuf,
        checksum: Option<String>,
    ) -> Self {
        Self {
            id,
            original_file_name,
            local_path,
            checksum,
            synced_at: Utc::now(),
        }
    }
}

/// Summary of the ledger contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub total_entries: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_stamped_now() {
        let before = Utc::now();
        let entry = LedgerEntry::new(
            "a1".to_string(),
            "x.jpg".to_string(),
            PathBuf::from("/photos/x.jpg"),
            None,
        );
        assert!(entry.synced_at >= before);
        assert!((Utc::now() - entry.synced_at).num_seconds() <= 1);
    }
}
