//! Sync ledger: the persistent record of assets already written locally.
//!
//! An asset ID present here is never downloaded again, even if the server
//! later reports a different checksum for it. Entries only disappear through
//! an explicit [`Ledger::reset`].

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{Ledger, SqliteLedger};
pub use error::LedgerError;
pub use types::LedgerEntry;
