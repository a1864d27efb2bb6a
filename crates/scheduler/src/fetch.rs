//! Network fetch seam for the lazy loader
//!
//! A [`Fetcher`] turns a URL into a streamed body plus an optional content
//! length. [`HttpFetcher`] is the production implementation over `ureq`;
//! tests substitute in-memory fetchers.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use exhibit_cache::{LoadError, LoadResult};
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};

/// Chunk size used when streaming HTTP bodies
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A started fetch: the advertised length and the body stream
pub struct FetchResponse {
    /// Value of the `Content-Length` header, if the server sent one
    pub content_length: Option<u64>,

    /// Body chunks in arrival order
    pub body: BoxStream<'static, LoadResult<Vec<u8>>>,
}

impl FetchResponse {
    /// Build a response from chunks already in memory
    pub fn from_chunks(content_length: Option<u64>, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            content_length,
            body: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Streaming-capable network client
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Start fetching `url`
    async fn fetch(&self, url: &str) -> LoadResult<FetchResponse>;
}

/// Blocking `ureq` client driven from tokio's blocking pool
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
    chunk_size: usize,
}

impl HttpFetcher {
    /// Create a fetcher with a 30 second read timeout
    pub fn new() -> Self {
        Self::with_agent(
            ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(10))
                .timeout_read(Duration::from_secs(30))
                .build(),
        )
    }

    /// Create a fetcher over a preconfigured agent
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self {
            agent,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the body chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> LoadResult<FetchResponse> {
        let agent = self.agent.clone();
        let request_url = url.to_string();
        let response = tokio::task::spawn_blocking(move || agent.get(&request_url).call())
            .await
            .map_err(|e| LoadError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => LoadError::Status {
                    url: url.to_string(),
                    status,
                },
                ureq::Error::Transport(transport) => LoadError::Network {
                    url: url.to_string(),
                    message: transport.to_string(),
                },
            })?;

        let content_length = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok());

        let (mut sender, receiver) = mpsc::channel::<LoadResult<Vec<u8>>>(4);
        let chunk_size = self.chunk_size;
        let body_url = url.to_string();
        tokio::task::spawn_blocking(move || {
            let mut reader = response.into_reader();
            let mut buffer = vec![0u8; chunk_size];
            loop {
                let item = match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(read) => Ok(buffer[..read].to_vec()),
                    Err(e) => Err(LoadError::Network {
                        url: body_url.clone(),
                        message: e.to_string(),
                    }),
                };
                let failed = item.is_err();
                // Receiver dropped means nobody wants the rest of the body
                if futures::executor::block_on(sender.send(item)).is_err() || failed {
                    break;
                }
            }
        });

        Ok(FetchResponse {
            content_length,
            body: receiver.boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_chunks_streams_in_order() {
        let response = FetchResponse::from_chunks(Some(6), vec![b"abc".to_vec(), b"def".to_vec()]);
        assert_eq!(response.content_length, Some(6));

        let chunks: Vec<Vec<u8>> = response
            .body
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), b"abcdef".to_vec());
    }

    #[tokio::test]
    async fn test_http_fetcher_reports_transport_errors() {
        // Port 9 (discard) on localhost is not expected to accept HTTP
        let fetcher = HttpFetcher::with_agent(
            ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_millis(200))
                .build(),
        );
        let result = fetcher.fetch("http://127.0.0.1:9/exhibit.png").await;
        assert!(matches!(result, Err(LoadError::Network { .. })));
    }
}
