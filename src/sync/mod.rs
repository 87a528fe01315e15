//! Sync engine: mirrors one album into one directory.
//!
//! A run probes the server, lists the album, and walks the assets in server
//! order. Assets already in the ledger are skipped; the rest are streamed to
//! disk and recorded one at a time. A failing asset is logged and skipped so
//! the next run retries it. At most one run is active per engine, and a run
//! can be cancelled between assets.

pub mod error;
pub mod file;

use std::io::IsTerminal;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineConfig, SyncConfig};
use crate::immich::{RemoteAsset, RemoteAssetClient, RemoteConnector};
use crate::ledger::{Ledger, LedgerEntry};

pub use error::AssetError;

/// Terminal outcome of a sync request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncRunResult {
    /// The whole asset list was processed. `failed` assets were skipped and
    /// stay eligible for the next run.
    Completed {
        downloaded: usize,
        total: usize,
        failed: usize,
    },
    /// Stopped at an asset boundary; earlier downloads remain recorded.
    Cancelled { downloaded: usize, total: usize },
    /// Another run held the slot; nothing was done.
    AlreadyRunning,
    MissingConfig { missing: Vec<&'static str> },
    CannotConnect,
    Failed { error: String },
}

impl SyncRunResult {
    /// Only a completed run counts as a successful sync.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncRunResult::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncRunResult::Cancelled { .. })
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, SyncRunResult::AlreadyRunning)
    }

    pub fn downloaded(&self) -> usize {
        match self {
            SyncRunResult::Completed { downloaded, .. }
            | SyncRunResult::Cancelled { downloaded, .. } => *downloaded,
            _ => 0,
        }
    }

    /// Number of assets in the album, when the listing got that far.
    pub fn total(&self) -> Option<usize> {
        match self {
            SyncRunResult::Completed { total, .. } | SyncRunResult::Cancelled { total, .. } => {
                Some(*total)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncRunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncRunResult::Completed {
                downloaded,
                total,
                failed,
            } => write!(
                f,
                "Sync completed: {} downloaded, {} failed, {} in album",
                downloaded, failed, total
            ),
            SyncRunResult::Cancelled { downloaded, total } => write!(
                f,
                "Sync cancelled after {} downloads ({} in album)",
                downloaded, total
            ),
            SyncRunResult::AlreadyRunning => write!(f, "Sync already in progress"),
            SyncRunResult::MissingConfig { missing } => {
                write!(f, "Missing config: {}", missing.join(", "))
            }
            SyncRunResult::CannotConnect => write!(f, "Cannot connect to Immich"),
            SyncRunResult::Failed { error } => write!(f, "Sync failed: {}", error),
        }
    }
}

/// Holds the active run's cancellation token; `None` while idle.
type RunSlot = Arc<Mutex<Option<CancellationToken>>>;

fn lock_slot(slot: &Mutex<Option<CancellationToken>>) -> MutexGuard<'_, Option<CancellationToken>> {
    // The slot only ever holds a token, so a poisoned lock is still consistent.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frees the run slot when dropped, whether the run returned, panicked, or
/// its task was dropped by the runtime.
struct RunGuard {
    slot: RunSlot,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *lock_slot(&self.slot) = None;
    }
}

/// Cloneable handle that cancels whichever run is currently active.
#[derive(Clone)]
pub struct CancelHandle {
    slot: RunSlot,
}

impl CancelHandle {
    /// Request cancellation of the active run. Returns `false` (and does
    /// nothing) when no run is active.
    pub fn cancel(&self) -> bool {
        match lock_slot(&self.slot).as_ref() {
            Some(token) => {
                token.cancel();
                tracing::info!("Cancellation requested");
                true
            }
            None => false,
        }
    }
}

/// Eventual result of [`SyncEngine::start_sync`]. Dropping it leaves the run
/// going in the background.
pub struct SyncHandle {
    inner: HandleInner,
}

enum HandleInner {
    Ready(SyncRunResult),
    Spawned(JoinHandle<SyncRunResult>),
}

impl SyncHandle {
    fn ready(result: SyncRunResult) -> Self {
        Self {
            inner: HandleInner::Ready(result),
        }
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> SyncRunResult {
        match self.inner {
            HandleInner::Ready(result) => result,
            HandleInner::Spawned(task) => match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Sync task failed: {}", e);
                    SyncRunResult::Failed {
                        error: e.to_string(),
                    }
                }
            },
        }
    }
}

pub struct SyncEngine {
    connector: Arc<dyn RemoteConnector>,
    ledger: Arc<dyn Ledger>,
    config: EngineConfig,
    slot: RunSlot,
}

impl SyncEngine {
    pub fn new(
        connector: Arc<dyn RemoteConnector>,
        ledger: Arc<dyn Ledger>,
        config: EngineConfig,
    ) -> Self {
        Self {
            connector,
            ledger,
            config,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        lock_slot(&self.slot).is_some()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            slot: self.slot.clone(),
        }
    }

    /// Cancel the active run, if any. See [`CancelHandle::cancel`].
    pub fn cancel_sync(&self) -> bool {
        self.cancel_handle().cancel()
    }

    /// Start a run on the current tokio runtime and return immediately.
    ///
    /// If a run is already active the returned handle resolves to
    /// [`SyncRunResult::AlreadyRunning`] without touching the network,
    /// filesystem, or ledger.
    pub fn start_sync(&self, config: SyncConfig) -> SyncHandle {
        let token = CancellationToken::new();
        {
            let mut slot = lock_slot(&self.slot);
            if slot.is_some() {
                tracing::info!("Sync already in progress");
                return SyncHandle::ready(SyncRunResult::AlreadyRunning);
            }
            *slot = Some(token.clone());
        }
        let guard = RunGuard {
            slot: self.slot.clone(),
        };

        let run = SyncRun {
            connector: self.connector.clone(),
            ledger: self.ledger.clone(),
            no_progress_bar: self.config.no_progress_bar,
            token,
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            run.execute(config).await
        });

        SyncHandle {
            inner: HandleInner::Spawned(task),
        }
    }
}

enum AssetOutcome {
    AlreadySynced,
    Downloaded { bytes: u64 },
}

/// State owned by one run.
struct SyncRun {
    connector: Arc<dyn RemoteConnector>,
    ledger: Arc<dyn Ledger>,
    no_progress_bar: bool,
    token: CancellationToken,
}

impl SyncRun {
    async fn execute(self, config: SyncConfig) -> SyncRunResult {
        tracing::info!("Starting sync...");

        let missing = config.missing_fields();
        if !missing.is_empty() {
            tracing::warn!(?missing, "Missing config, skipping sync");
            return SyncRunResult::MissingConfig { missing };
        }
        tracing::info!(
            album_id = %config.album_id,
            destination = %config.local_path.display(),
            "Config loaded for sync"
        );

        let client = match self.connector.connect(&config) {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = %e, "Cannot build Immich client");
                return SyncRunResult::CannotConnect;
            }
        };

        if !client.validate_connection().await {
            tracing::error!("Cannot connect to Immich");
            return SyncRunResult::CannotConnect;
        }

        let assets = match client.list_album_assets(&config.album_id).await {
            Ok(assets) => assets,
            Err(e) => {
                tracing::error!(album_id = %config.album_id, error = %e, "Failed to list album assets");
                return SyncRunResult::Failed {
                    error: e.to_string(),
                };
            }
        };
        let total = assets.len();
        tracing::info!("Found {} assets in album", total);

        let pb = create_progress_bar(self.no_progress_bar, total as u64);
        let mut downloaded = 0usize;
        let mut failed = 0usize;

        for asset in &assets {
            if self.token.is_cancelled() {
                pb.finish_and_clear();
                tracing::info!(downloaded, "Sync cancelled by user");
                return SyncRunResult::Cancelled { downloaded, total };
            }

            pb.set_message(asset.original_file_name.clone());
            match self
                .sync_asset(client.as_ref(), asset, &config.local_path)
                .await
            {
                Ok(AssetOutcome::AlreadySynced) => {
                    tracing::debug!(
                        asset_id = %asset.id,
                        file = %asset.original_file_name,
                        "Skipping already-synced asset"
                    );
                }
                Ok(AssetOutcome::Downloaded { bytes }) => {
                    downloaded += 1;
                    pb.suspend(|| {
                        tracing::info!(
                            asset_id = %asset.id,
                            size_bytes = bytes,
                            "Synced {}",
                            asset.original_file_name
                        )
                    });
                }
                Err(e) => {
                    failed += 1;
                    pb.suspend(|| {
                        tracing::error!(
                            asset_id = %asset.id,
                            error = %e,
                            "Failed to download {}",
                            asset.original_file_name
                        )
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        if downloaded > 0 {
            tracing::info!("Sync completed. Downloaded {} new assets.", downloaded);
        } else {
            tracing::info!("Sync completed. No new assets.");
        }
        if failed > 0 {
            tracing::warn!(failed, "Some assets failed and will be retried next run");
        }

        SyncRunResult::Completed {
            downloaded,
            total,
            failed,
        }
    }

    /// Check, download, and record a single asset.
    async fn sync_asset(
        &self,
        client: &dyn RemoteAssetClient,
        asset: &RemoteAsset,
        dest_dir: &Path,
    ) -> Result<AssetOutcome, AssetError> {
        if self.ledger.contains(&asset.id).await? {
            return Ok(AssetOutcome::AlreadySynced);
        }

        let file_name = file::safe_file_name(&asset.original_file_name)
            .ok_or_else(|| AssetError::InvalidFileName(asset.original_file_name.clone()))?;
        let download_path = dest_dir.join(file_name);

        tracing::debug!(
            asset_id = %asset.id,
            path = %download_path.display(),
            "downloading",
        );
        let stream = client.open_asset_stream(&asset.id).await?;
        tokio::fs::create_dir_all(dest_dir).await?;
        let bytes = file::write_stream(
            stream,
            &download_path,
            &file::part_path(dest_dir, &asset.id),
        )
        .await?;

        self.ledger
            .record(&LedgerEntry::new(
                asset.id.clone(),
                asset.original_file_name.clone(),
                download_path,
                asset.checksum.clone(),
            ))
            .await?;

        Ok(AssetOutcome::Downloaded { bytes })
    }
}

/// Create a progress bar with a consistent template.
///
/// Hidden when disabled or when stdout is not a TTY (cron, systemd, pipes).
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    match ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => tracing::debug!("Invalid progress template: {}", e),
    }
    pb
}
