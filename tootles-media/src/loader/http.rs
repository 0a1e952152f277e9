use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use url::Url;

use super::Fetcher;
use crate::{config::LoaderSettings, error::FetchError, units::ByteSize};

/// [`Fetcher`] backed by a shared `reqwest` client.
///
/// Per-attempt timeouts are applied by the loader, not the client, so the
/// retry policy sees them as [`FetchError::Timeout`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(settings: &LoaderSettings) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| FetchError::NetworkFailure(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, limit: ByteSize) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16()));
        }

        if let Some(declared) = response.content_length()
            && declared > limit.as_bytes()
        {
            return Err(FetchError::OversizeResponse { limit });
        }

        let capacity = response
            .content_length()
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0);
        let mut body = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (body.len() + chunk.len()) as u64 > limit.as_bytes() {
                return Err(FetchError::OversizeResponse { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}
