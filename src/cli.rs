use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "immich-sync",
    version,
    about = "Mirror an Immich album into a local directory"
)]
pub struct Cli {
    /// Directory holding the ledger database
    #[arg(long, global = true, env = "IMMICH_SYNC_DATA_DIR", default_value = "~/.immich-sync")]
    pub data_dir: String,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one sync of the active connection
    Sync(SyncArgs),

    /// Sync shortly after startup, then on a fixed interval
    Watch(WatchArgs),

    /// Show the active connection and ledger state
    Status,

    /// Forget every downloaded asset so the next run fetches them again
    ResetState(ResetStateArgs),

    /// Check that the server accepts the API key
    Validate(RemoteArgs),

    /// List albums visible to the API key
    Albums(RemoteArgs),

    /// Manage stored connections
    #[command(subcommand)]
    Connections(ConnectionsCommand),
}

/// Server and credential overrides.
#[derive(Args, Debug, Clone, Default)]
pub struct RemoteArgs {
    /// Immich server URL, e.g. http://nas:2283
    #[arg(long, env = "IMMICH_URL")]
    pub server_url: Option<String>,

    /// Immich API key.
    /// WARNING: passing via --api-key is visible in process listings.
    /// Prefer the IMMICH_API_KEY environment variable instead.
    #[arg(long, env = "IMMICH_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SyncArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Album to mirror (overrides the active connection)
    #[arg(long)]
    pub album_id: Option<String>,

    /// Local destination directory (overrides the active connection)
    #[arg(short = 'd', long)]
    pub directory: Option<String>,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Timeout in seconds for API requests
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub sync: SyncArgs,

    /// Seconds to wait before the first run
    #[arg(long, default_value_t = 5)]
    pub startup_delay: u64,

    /// Seconds between runs
    #[arg(long, default_value_t = 600, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ResetStateArgs {
    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConnectionsCommand {
    /// List stored connections
    List,

    /// Store a new connection
    Add(AddConnectionArgs),

    /// Make a connection active (by id or name)
    Use { connection: String },

    /// Delete a connection (by id or name)
    Remove { connection: String },
}

#[derive(Args, Debug, Clone)]
pub struct AddConnectionArgs {
    /// Display name
    #[arg(long)]
    pub name: String,

    /// Immich server URL
    #[arg(long)]
    pub server_url: String,

    /// Immich API key
    #[arg(long, env = "IMMICH_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Album to mirror
    #[arg(long)]
    pub album_id: String,

    /// Album display name
    #[arg(long, default_value = "")]
    pub album_name: String,

    /// Local destination directory
    #[arg(short = 'd', long)]
    pub directory: String,

    /// Make this the active connection
    #[arg(long)]
    pub activate: bool,
}
