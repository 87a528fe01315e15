use thiserror::Error;

use crate::immich::RemoteError;
use crate::ledger::LedgerError;

/// Failure of a single asset within a run.
///
/// Always recovered by the engine: the asset is logged, left out of the
/// ledger, and picked up again by the next run.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Unusable file name '{0}'")]
    InvalidFileName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_error_message() {
        let e = AssetError::from(std::io::Error::other("disk full"));
        assert_eq!(e.to_string(), "Disk error: disk full");
    }

    #[test]
    fn test_remote_error_is_transparent() {
        let e = AssetError::from(RemoteError::Status {
            status: 500,
            path: "/api/assets/a1/original".into(),
        });
        assert_eq!(
            e.to_string(),
            "HTTP error 500 requesting /api/assets/a1/original"
        );
    }
}
