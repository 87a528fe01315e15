use thiserror::Error;

/// Errors raised by the Immich client.
///
/// The engine never retries on these; a failed listing ends the run and a
/// failed asset transfer is skipped until the next run.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error requesting {path}: {source}")]
    Http {
        source: reqwest::Error,
        path: String,
    },

    #[error("HTTP error {status} requesting {path}")]
    Status { status: u16, path: String },

    #[error("Failed to decode response from {path}: {source}")]
    Decode {
        source: reqwest::Error,
        path: String,
    },

    #[error("Invalid server URL '{0}'")]
    InvalidUrl(String),

    #[error("Invalid API key header value")]
    InvalidApiKey,

    #[error("Failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

impl RemoteError {
    /// Whether the server rejected the credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::Status { status, .. } if *status == 401 || *status == 403)
    }
}
