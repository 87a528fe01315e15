//! immich-sync: mirror an Immich album into a local directory.
//!
//! Each run lists the album, downloads originals not yet recorded in the
//! local ledger, and records them. Runs are one-shot (`sync`) or scheduled
//! (`watch`); several server/album profiles can be stored and switched
//! between with `connections`.

#![warn(clippy::all)]

mod cli;
mod config;
mod connections;
mod immich;
mod ledger;
mod shutdown;
mod sync;
mod types;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Command, ConnectionsCommand};
use config::{EngineConfig, SyncConfig, SyncOverrides};
use connections::{Connection, ConnectionStore, NewConnection};
use immich::{ImmichClient, ImmichConnector};
use ledger::{Ledger, SqliteLedger};
use sync::{SyncEngine, SyncRunResult};

/// Ledger and connection profiles, both backed by the same database file.
struct Stores {
    ledger: Arc<SqliteLedger>,
    connections: ConnectionStore,
}

/// Resolve the database path, creating its directory if needed.
fn prepare_db_path(data_dir: &Path) -> anyhow::Result<PathBuf> {
    let db_path = config::database_path(data_dir);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(db_path)
}

async fn open_stores(data_dir: &Path) -> anyhow::Result<Stores> {
    let db_path = prepare_db_path(data_dir)?;
    let ledger = SqliteLedger::open(&db_path)
        .await
        .with_context(|| format!("Failed to open ledger at {}", db_path.display()))?;
    let connections = ConnectionStore::open(&db_path)?;
    tracing::debug!("Database opened at {}", ledger.path().display());
    Ok(Stores {
        ledger: Arc::new(ledger),
        connections,
    })
}

/// Active connection, or `None` when no database exists yet.
fn load_active_connection(data_dir: &Path) -> anyhow::Result<Option<Connection>> {
    let db_path = config::database_path(data_dir);
    if !db_path.exists() {
        return Ok(None);
    }
    Ok(ConnectionStore::open(&db_path)?.active()?)
}

fn build_engine(stores: &Stores, engine_config: &EngineConfig) -> SyncEngine {
    SyncEngine::new(
        Arc::new(ImmichConnector::new(engine_config.request_timeout)),
        stores.ledger.clone(),
        engine_config.clone(),
    )
}

/// Start a run and wait for it, turning a shutdown signal into a cancel
/// request so the run stops at the next asset boundary.
async fn run_once(
    engine: &SyncEngine,
    config: SyncConfig,
    shutdown: &CancellationToken,
) -> SyncRunResult {
    let wait = engine.start_sync(config).wait();
    tokio::pin!(wait);
    tokio::select! {
        result = &mut wait => result,
        _ = shutdown.cancelled() => {
            engine.cancel_sync();
            wait.await
        }
    }
}

/// Stamp the last sync time on the active connection if the run synced it.
fn record_last_sync(
    store: &ConnectionStore,
    active: Option<&Connection>,
    ran: &SyncConfig,
    result: &SyncRunResult,
) {
    let Some(connection) = active.filter(|c| c.was_synced_by(ran, result)) else {
        return;
    };
    if let Err(e) = store.update_last_sync_time(&connection.id, chrono::Utc::now()) {
        tracing::warn!(id = %connection.id, "Failed to record last sync time: {}", e);
    }
}

fn print_result(result: &SyncRunResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
    } else {
        println!("{}", result);
    }
    Ok(())
}

/// Sleep for `duration`. Returns `false` if shutdown was requested first.
async fn sleep_or_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.cancelled() => false,
    }
}

/// Run the sync command.
async fn run_sync(data_dir: &Path, args: cli::SyncArgs) -> anyhow::Result<()> {
    let stores = open_stores(data_dir).await?;
    let active = stores.connections.active()?;
    let sync_config = config::resolve_sync_config(active.as_ref(), &SyncOverrides::from(&args));
    let engine = build_engine(&stores, &EngineConfig::from(&args));

    let shutdown_token = shutdown::install_signal_handler()?;
    let result = run_once(&engine, sync_config.clone(), &shutdown_token).await;
    if let Some(total) = result.total() {
        tracing::debug!(total, downloaded = result.downloaded(), "Run finished");
    }

    record_last_sync(&stores.connections, active.as_ref(), &sync_config, &result);
    print_result(&result, args.json)?;

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Run the watch command: one run after the startup delay, then one per
/// interval until a shutdown signal arrives.
async fn run_watch(data_dir: &Path, args: cli::WatchArgs) -> anyhow::Result<()> {
    let stores = open_stores(data_dir).await?;
    let overrides = SyncOverrides::from(&args.sync);
    let engine = build_engine(&stores, &EngineConfig::from(&args.sync));
    let shutdown_token = shutdown::install_signal_handler()?;

    tracing::info!(
        startup_delay = args.startup_delay,
        interval = args.interval,
        "Watching album"
    );

    if sleep_or_shutdown(Duration::from_secs(args.startup_delay), &shutdown_token).await {
        loop {
            // Re-read every cycle so `connections use` takes effect without a restart.
            let active = match stores.connections.active() {
                Ok(active) => active,
                Err(e) => {
                    tracing::warn!("Failed to load active connection: {}", e);
                    None
                }
            };
            let sync_config = config::resolve_sync_config(active.as_ref(), &overrides);
            let result = run_once(&engine, sync_config.clone(), &shutdown_token).await;
            record_last_sync(&stores.connections, active.as_ref(), &sync_config, &result);

            if result.is_success() {
                tracing::info!("{}", result);
            } else if result.is_already_running() {
                tracing::debug!("Previous run still active, skipping cycle");
            } else {
                tracing::warn!("{}", result);
            }
            if args.sync.json {
                print_result(&result, true)?;
            }

            if result.is_cancelled() || shutdown_token.is_cancelled() {
                break;
            }
            tracing::info!("Waiting {} seconds...", args.interval);
            if !sleep_or_shutdown(Duration::from_secs(args.interval), &shutdown_token).await {
                break;
            }
        }
    }

    tracing::info!("Shutdown requested, exiting...");
    Ok(())
}

/// Run the status command.
async fn run_status(data_dir: &Path) -> anyhow::Result<()> {
    let db_path = config::database_path(data_dir);

    if !db_path.exists() {
        println!("No database found at {}", db_path.display());
        println!("Add a connection or run a sync first.");
        return Ok(());
    }

    let stores = open_stores(data_dir).await?;
    println!("Database: {}", db_path.display());
    println!();

    match stores.connections.active()? {
        Some(c) => {
            println!("Active connection: {} ({})", c.name, c.id);
            println!("  Server:    {}", c.server_url);
            println!("  API key:   {}", config::mask_api_key(&c.api_key));
            if c.album_name.is_empty() {
                println!("  Album:     {}", c.album_id);
            } else {
                println!("  Album:     {} ({})", c.album_name, c.album_id);
            }
            println!("  Directory: {}", c.local_path.display());
            match c.last_sync_time {
                Some(at) => println!("  Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("  Last sync: never"),
            }
        }
        None => println!("No active connection."),
    }
    println!();

    let summary = stores.ledger.summary().await?;
    println!("Ledger:");
    println!("  Synced assets: {}", summary.total_entries);
    if let Some(last) = summary.last_synced_at {
        println!("  Last write:    {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

/// Run the reset-state command.
async fn run_reset_state(data_dir: &Path, args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let db_path = config::database_path(data_dir);

    if !db_path.exists() {
        println!("No database found at {}", db_path.display());
        return Ok(());
    }

    if !args.yes {
        println!("This will forget every synced asset recorded in:");
        println!("  {}", db_path.display());
        println!("The next sync downloads the whole album again.");
        println!();
        print!("Are you sure? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let ledger = SqliteLedger::open(&db_path).await?;
    let removed = ledger.reset().await?;
    println!("Removed {} ledger entries.", removed);

    Ok(())
}

/// Build a client from the active connection plus overrides.
fn remote_client(data_dir: &Path, args: &cli::RemoteArgs) -> anyhow::Result<ImmichClient> {
    let active = load_active_connection(data_dir)?;
    let remote = config::resolve_sync_config(active.as_ref(), &SyncOverrides::from(args));

    let missing: Vec<&str> = remote
        .missing_fields()
        .into_iter()
        .filter(|f| matches!(*f, "server_url" | "api_key"))
        .collect();
    if !missing.is_empty() {
        anyhow::bail!(
            "Missing config: {}. Add a connection or pass --server-url/--api-key.",
            missing.join(", ")
        );
    }

    tracing::debug!(
        server_url = %remote.server_url,
        api_key = %config::mask_api_key(&remote.api_key),
        "Using remote"
    );
    Ok(ImmichClient::new(
        &remote.server_url,
        &remote.api_key,
        immich::client::DEFAULT_REQUEST_TIMEOUT,
    )?)
}

/// Run the validate command.
async fn run_validate(data_dir: &Path, args: cli::RemoteArgs) -> anyhow::Result<()> {
    let client = remote_client(data_dir, &args)?;
    match client.check_credentials().await {
        Ok(()) => {
            println!("Connection OK");
            Ok(())
        }
        Err(e) if e.is_auth() => {
            eprintln!("Server rejected the API key: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Cannot connect to Immich: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run the albums command.
async fn run_albums(data_dir: &Path, args: cli::RemoteArgs) -> anyhow::Result<()> {
    let client = remote_client(data_dir, &args)?;
    let albums = client.list_albums().await?;

    if albums.is_empty() {
        println!("No albums visible to this API key.");
        return Ok(());
    }
    println!("Albums:");
    for album in &albums {
        println!(
            "  {}  {} ({} assets)",
            album.id, album.album_name, album.asset_count
        );
    }
    Ok(())
}

/// Run a connections subcommand.
fn run_connections(data_dir: &Path, command: ConnectionsCommand) -> anyhow::Result<()> {
    let store = ConnectionStore::open(&prepare_db_path(data_dir)?)?;

    match command {
        ConnectionsCommand::List => {
            let all = store.list()?;
            if all.is_empty() {
                println!("No connections stored.");
            }
            for c in &all {
                let marker = if c.active { "*" } else { " " };
                let last_sync = c
                    .last_sync_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{} {}  {}  {}  album={}  dir={}  last_sync={}",
                    marker,
                    c.name,
                    c.id,
                    c.server_url,
                    c.album_id,
                    c.local_path.display(),
                    last_sync
                );
            }
        }
        ConnectionsCommand::Add(args) => {
            let added = store.add(
                NewConnection {
                    name: args.name,
                    server_url: args.server_url,
                    api_key: args.api_key,
                    album_id: args.album_id,
                    album_name: args.album_name,
                    local_path: config::expand_tilde(&args.directory),
                },
                args.activate,
            )?;
            println!("Added connection '{}' ({})", added.name, added.id);
            if added.active {
                println!("'{}' is now the active connection.", added.name);
            }
        }
        ConnectionsCommand::Use { connection } => {
            let c = store.set_active(&connection)?;
            println!("'{}' is now the active connection.", c.name);
        }
        ConnectionsCommand::Remove { connection } => {
            let c = store.remove(&connection)?;
            println!("Removed connection '{}' ({})", c.name, c.id);
            if c.active {
                println!("No connection is active now; pick one with `connections use`.");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // Logs go to stderr so `sync --json` output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let data_dir = config::expand_tilde(&cli.data_dir);

    match cli.command {
        Command::Sync(args) => run_sync(&data_dir, args).await,
        Command::Watch(args) => run_watch(&data_dir, args).await,
        Command::Status => run_status(&data_dir).await,
        Command::ResetState(args) => run_reset_state(&data_dir, args).await,
        Command::Validate(args) => run_validate(&data_dir, args).await,
        Command::Albums(args) => run_albums(&data_dir, args).await,
        Command::Connections(command) => run_connections(&data_dir, command),
    }
}
