use crate::error::IngestionError;
use crate::source::SourceDescriptor;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::io::ErrorKind;
use std::time::Duration;

/// Reads the raw bytes of a source. One call is one attempt; retries live in the caller.
///
/// This trait is the seam that lets tests swap in flaky or scripted sources.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<u8>, IngestionError>;
}

/// Fetches local files from disk and remote sources over HTTP(S).
#[derive(Clone)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new(timeout: Duration) -> Result<Self, IngestionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestionError::ClientBuild(e.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch_file(&self, source: &SourceDescriptor, path: &std::path::Path) -> Result<Vec<u8>, IngestionError> {
        tokio::fs::read(path).await.map_err(|e| {
            let transient = matches!(
                e.kind(),
                ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
            );
            if transient {
                IngestionError::Network {
                    source_name: source.name(),
                    attempts: 1,
                    message: e.to_string(),
                    transient,
                }
            } else {
                IngestionError::Unavailable { source_name: source.name(), message: e.to_string() }
            }
        })
    }

    async fn fetch_http(
        &self,
        source: &SourceDescriptor,
        url: &str,
        auth_token: Option<&str>,
    ) -> Result<Vec<u8>, IngestionError> {
        let mut request = self.client.get(url);
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| IngestionError::Network {
            source_name: source.name(),
            attempts: 1,
            message: e.to_string(),
            // Builder errors (bad URL etc.) will not fix themselves.
            transient: !e.is_builder(),
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(IngestionError::Auth { source_name: source.name(), status: status.as_u16() });
        }
        if !status.is_success() {
            let transient = status.is_server_error()
                || status == StatusCode::TOO_MANY_REQUESTS
                || status == StatusCode::REQUEST_TIMEOUT;
            return Err(IngestionError::Network {
                source_name: source.name(),
                attempts: 1,
                message: format!("HTTP {}", status.as_u16()),
                transient,
            });
        }

        let body = response.bytes().await.map_err(|e| IngestionError::Network {
            source_name: source.name(),
            attempts: 1,
            message: format!("failed reading response body: {}", e),
            transient: true,
        })?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl SourceFetcher for DefaultFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<u8>, IngestionError> {
        match source {
            SourceDescriptor::File { path, .. } => self.fetch_file(source, path).await,
            SourceDescriptor::Http { url, auth_token, .. } => {
                self.fetch_http(source, url, auth_token.as_deref()).await
            }
        }
    }
}
