use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{RemoteArgs, SyncArgs};
use crate::connections::Connection;

/// Everything one sync run needs. Captured once per run; later edits to the
/// stored connection do not affect a run already in progress.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SyncConfig {
    pub server_url: String,
    pub api_key: String,
    pub album_id: String,
    pub local_path: PathBuf,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("server_url", &self.server_url)
            .field("api_key", &mask_api_key(&self.api_key))
            .field("album_id", &self.album_id)
            .field("local_path", &self.local_path)
            .finish()
    }
}

impl SyncConfig {
    /// Names of required fields that are empty or whitespace-only.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.server_url.trim().is_empty() {
            missing.push("server_url");
        }
        if self.api_key.trim().is_empty() {
            missing.push("api_key");
        }
        if self.album_id.trim().is_empty() {
            missing.push("album_id");
        }
        if self.local_path.as_os_str().is_empty() {
            missing.push("local_path");
        }
        missing
    }
}

/// Per-field overrides layered over the active connection.
#[derive(Debug, Clone, Default)]
pub struct SyncOverrides {
    pub server_url: Option<String>,
    pub api_key: Option<String>,
    pub album_id: Option<String>,
    pub directory: Option<String>,
}

impl From<&RemoteArgs> for SyncOverrides {
    fn from(args: &RemoteArgs) -> Self {
        Self {
            server_url: args.server_url.clone(),
            api_key: args.api_key.clone(),
            ..Self::default()
        }
    }
}

impl From<&SyncArgs> for SyncOverrides {
    fn from(args: &SyncArgs) -> Self {
        Self {
            album_id: args.album_id.clone(),
            directory: args.directory.clone(),
            ..Self::from(&args.remote)
        }
    }
}

/// Build the config for a run from the active connection plus overrides.
///
/// Missing pieces stay empty; the engine reports them rather than this
/// function failing, so an unconfigured install still produces a result.
pub fn resolve_sync_config(active: Option<&Connection>, overrides: &SyncOverrides) -> SyncConfig {
    let base = active.map(Connection::sync_config).unwrap_or_default();
    SyncConfig {
        server_url: overrides.server_url.clone().unwrap_or(base.server_url),
        api_key: overrides.api_key.clone().unwrap_or(base.api_key),
        album_id: overrides.album_id.clone().unwrap_or(base.album_id),
        local_path: overrides
            .directory
            .as_deref()
            .map(expand_tilde)
            .unwrap_or(base.local_path),
    }
}

/// Engine-level knobs that are not part of a connection.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub no_progress_bar: bool,
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            no_progress_bar: false,
            request_timeout: crate::immich::client::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl From<&SyncArgs> for EngineConfig {
    fn from(args: &SyncArgs) -> Self {
        Self {
            no_progress_bar: args.no_progress_bar || args.json,
            request_timeout: Duration::from_secs(args.timeout),
        }
    }
}

/// Mask an API key for logs: `***` plus the last four characters.
pub fn mask_api_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = key.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("***{}", tail)
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Location of the SQLite file holding the ledger and connections.
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("db").join("immich-sync.db")
}
