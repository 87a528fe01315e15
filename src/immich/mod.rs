//! Immich API client.
//!
//! Only the handful of endpoints the sync engine needs are covered: a
//! credential probe, album listing, album contents, and the original-file
//! download. The engine talks to the server through [`RemoteAssetClient`] so
//! tests can substitute an in-memory album.

pub mod client;
pub mod error;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::config::SyncConfig;

pub use client::{ImmichClient, ImmichConnector};
pub use error::RemoteError;
pub use types::RemoteAsset;

/// Byte stream of an asset's original content.
pub type AssetStream = BoxStream<'static, Result<Bytes, RemoteError>>;

/// Remote side of a sync run.
#[async_trait]
pub trait RemoteAssetClient: Send + Sync {
    /// Lightweight authenticated probe. Never fails; any error reads as `false`.
    async fn validate_connection(&self) -> bool;

    /// Full current membership of an album, in server order.
    async fn list_album_assets(&self, album_id: &str) -> Result<Vec<RemoteAsset>, RemoteError>;

    /// Open a stream over the asset's unmodified original bytes.
    async fn open_asset_stream(&self, asset_id: &str) -> Result<AssetStream, RemoteError>;
}

/// Builds a client for the credentials of one run's config snapshot.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, config: &SyncConfig) -> Result<Box<dyn RemoteAssetClient>, RemoteError>;
}
