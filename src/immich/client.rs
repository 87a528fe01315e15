use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

use super::error::RemoteError;
use super::types::{AlbumDetail, AlbumSummary, RemoteAsset};
use super::{AssetStream, RemoteAssetClient, RemoteConnector};
use crate::config::SyncConfig;

const API_KEY_HEADER: &str = "x-api-key";

/// Default timeout for JSON requests. Downloads are bounded per read instead,
/// since large videos can legitimately stream for a long time.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for a single Immich server and API key.
#[derive(Clone)]
pub struct ImmichClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl std::fmt::Debug for ImmichClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImmichClient")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Normalize a user-supplied server URL into the `/api` base.
///
/// Trailing slashes are dropped before `/api` is appended, so
/// `http://nas:2283/` and `http://nas:2283` both map to `http://nas:2283/api`.
pub(crate) fn api_base_url(server_url: &str) -> Result<Url, RemoteError> {
    let trimmed = server_url.trim().trim_end_matches('/');
    let url = Url::parse(&format!("{}/api", trimmed))
        .map_err(|_| RemoteError::InvalidUrl(server_url.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(RemoteError::InvalidUrl(server_url.to_string()));
    }
    Ok(url)
}

impl ImmichClient {
    pub fn new(server_url: &str, api_key: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base_url = api_base_url(server_url)?;

        let mut key = HeaderValue::from_str(api_key).map_err(|_| RemoteError::InvalidApiKey)?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        // Binding to the IPv4 wildcard forces IPv4 connections. Some dual-stack
        // hosts resolve AAAA records they cannot actually route to.
        let client = Client::builder()
            .default_headers(headers)
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .connect_timeout(timeout)
            // A server that stops sending body bytes fails the asset instead
            // of holding the run open forever.
            .read_timeout(timeout)
            .build()
            .map_err(RemoteError::Client)?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Resolve `segments` below the `/api` base, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, RemoteError> {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RemoteError::Http {
                source: e,
                path: path.clone(),
            })?;

        if !response.status().is_success() {
            return Err(RemoteError::Status {
                status: response.status().as_u16(),
                path,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode { source: e, path })
    }

    /// Albums visible to this API key.
    pub async fn list_albums(&self) -> Result<Vec<AlbumSummary>, RemoteError> {
        self.get_json(&["albums"]).await
    }

    /// Authenticated probe of `GET /users/me`, keeping the failure reason.
    pub async fn check_credentials(&self) -> Result<(), RemoteError> {
        self.get_json::<serde_json::Value>(&["users", "me"])
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl RemoteAssetClient for ImmichClient {
    async fn validate_connection(&self) -> bool {
        match self.check_credentials().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Connection validation failed");
                false
            }
        }
    }

    async fn list_album_assets(&self, album_id: &str) -> Result<Vec<RemoteAsset>, RemoteError> {
        let detail: AlbumDetail = self.get_json(&["albums", album_id]).await?;
        Ok(detail.assets)
    }

    async fn open_asset_stream(&self, asset_id: &str) -> Result<AssetStream, RemoteError> {
        let url = self.endpoint(&["assets", asset_id, "original"])?;
        let path = url.path().to_string();
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await
            .map_err(|e| RemoteError::Http {
                source: e,
                path: path.clone(),
            })?;

        if !response.status().is_success() {
            return Err(RemoteError::Status {
                status: response.status().as_u16(),
                path,
            });
        }

        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| RemoteError::Http {
                source: e,
                path: path.clone(),
            })
        });
        Ok(stream.boxed())
    }
}

/// Connector producing [`ImmichClient`]s with a fixed request timeout.
#[derive(Debug, Clone)]
pub struct ImmichConnector {
    timeout: Duration,
}

impl ImmichConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ImmichConnector {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl RemoteConnector for ImmichConnector {
    fn connect(&self, config: &SyncConfig) -> Result<Box<dyn RemoteAssetClient>, RemoteError> {
        let client = ImmichClient::new(&config.server_url, &config.api_key, self.timeout)?;
        Ok(Box::new(client))
    }
}
