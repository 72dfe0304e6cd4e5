/// Lifecycle requests against the sidecar REST gateway
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::SdkConfig;
use crate::error::{Result, SdkError};
use crate::types::GameServer;
use crate::watch::decode_game_server;

/// Pause between two attempts of a failed request
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct KeyValue<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct ReserveDuration {
    seconds: u64,
}

#[derive(Debug, Serialize)]
struct Empty {}

/// HTTP/JSON client for the sidecar lifecycle endpoints
///
/// Every request except `health` is retried up to `retry_limit` times on connection
/// failures, timeouts and 5xx answers, with a fixed pause between attempts.
#[derive(Debug, Clone)]
pub struct LifecycleClient {
    client: reqwest::Client,
    base_url: String,
    retry_limit: u32,
    retry_pause: Duration,
}

impl LifecycleClient {
    pub fn new(config: &SdkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.http_base_url(),
            retry_limit: config.retry_limit,
            retry_pause: DEFAULT_RETRY_PAUSE,
        })
    }

    /// Set the pause between retries
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Mark the game server Ready to take player connections
    pub async fn ready(&self) -> Result<()> {
        self.send(Method::POST, "ready", Some(&Empty {}), true)
            .await
            .map(drop)
    }

    /// Send a health ping. Never retried: the next ping supersedes it.
    pub async fn health(&self) -> Result<()> {
        self.send(Method::POST, "health", Some(&Empty {}), false)
            .await
            .map(drop)
    }

    /// Ask for the game server to be shut down
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Method::POST, "shutdown", Some(&Empty {}), true)
            .await
            .map(drop)
    }

    /// Mark the game server Allocated
    pub async fn allocate(&self) -> Result<()> {
        self.send(Method::POST, "allocate", Some(&Empty {}), true)
            .await
            .map(drop)
    }

    /// Mark the game server Reserved for `duration` (whole seconds, zero means forever)
    pub async fn reserve(&self, duration: Duration) -> Result<()> {
        let body = ReserveDuration {
            seconds: duration.as_secs(),
        };
        self.send(Method::POST, "reserve", Some(&body), true)
            .await
            .map(drop)
    }

    /// Set a metadata label (stored with an `agones.dev/sdk-` prefix by the sidecar)
    pub async fn set_label(&self, key: &str, value: &str) -> Result<()> {
        self.send(Method::PUT, "metadata/label", Some(&KeyValue { key, value }), true)
            .await
            .map(drop)
    }

    /// Set a metadata annotation (stored with an `agones.dev/sdk-` prefix by the sidecar)
    pub async fn set_annotation(&self, key: &str, value: &str) -> Result<()> {
        self.send(
            Method::PUT,
            "metadata/annotation",
            Some(&KeyValue { key, value }),
            true,
        )
        .await
        .map(drop)
    }

    /// Fetch the current GameServer
    pub async fn game_server(&self) -> Result<GameServer> {
        let body = self.send::<Empty>(Method::GET, "gameserver", None, true).await?;
        decode_game_server(&body)
    }

    /// GET `path` and decode the JSON answer
    pub(crate) async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.send::<Empty>(Method::GET, path, None, true).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub(crate) async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        retry: bool,
    ) -> Result<Vec<u8>> {
        let attempts = if retry { 1 + self.retry_limit } else { 1 };
        let mut attempt = 1;
        loop {
            match self.send_once(method.clone(), path, body).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    tracing::warn!(
                        "{} /{} failed (attempt {}/{}), retrying in {:?}: {}",
                        method,
                        path,
                        attempt,
                        attempts,
                        self.retry_pause,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_pause).await;
                }
                Err(e) => {
                    tracing::error!("{} /{} failed: {}", method, path, e);
                    return Err(e);
                }
            }
        }
    }

    async fn send_once<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(SdkError::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes.to_vec())
    }
}
