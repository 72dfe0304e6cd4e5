//! Configuration for the SDK and its watch channel

use std::time::Duration;

use crate::error::{Result, SdkError};

/// Environment variable overriding the sidecar gRPC port
pub const GRPC_PORT_ENV: &str = "AGONES_SDK_GRPC_PORT";

/// Environment variable overriding the sidecar HTTP port
pub const HTTP_PORT_ENV: &str = "AGONES_SDK_HTTP_PORT";

/// Default sidecar gRPC port
pub const DEFAULT_GRPC_PORT: u16 = 59357;

/// Default sidecar HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 9358;

/// Path of the push endpoint on the HTTP port
pub const WATCH_PATH: &str = "watch/gameserver";

/// Which push source the watch channel subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Server-streaming `WatchGameServer` RPC, one protobuf message per read
    Grpc,
    /// WebSocket on the HTTP port pushing JSON envelopes
    #[default]
    WebSocket,
    /// Chunked HTTP response of newline-delimited JSON envelopes
    HttpStream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Grpc => write!(f, "grpc"),
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::HttpStream => write!(f, "http-stream"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "grpc" => Ok(TransportKind::Grpc),
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "http-stream" | "http" => Ok(TransportKind::HttpStream),
            other => Err(SdkError::InvalidConfig(format!(
                "unknown transport '{}', expected grpc, websocket or http-stream",
                other
            ))),
        }
    }
}

/// Watch channel configuration
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Push source to subscribe to
    pub transport: TransportKind,

    /// Period of the liveness check that re-establishes a dropped subscription
    pub reconnect_interval: Duration,

    /// Upper bound on a single connection attempt
    pub connect_timeout: Duration,

    /// Largest reassembled message accepted, in bytes
    pub max_message_size: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            reconnect_interval: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(30),
            max_message_size: 16 << 20,
        }
    }
}

impl WatchConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the push transport
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Set the reconnection check period
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the connection attempt timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum reassembled message size
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

/// Main configuration for an [`Sdk`](crate::Sdk)
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// Sidecar host name
    pub host: String,

    /// Sidecar gRPC port
    pub grpc_port: u16,

    /// Sidecar HTTP port (REST and WebSocket)
    pub http_port: u16,

    /// Period of automatic health pings. Zero disables them.
    pub health_period: Duration,

    /// How many times a failed request is sent again
    pub retry_limit: u32,

    /// Whether to poll for the GameServer and mark it Ready on startup
    pub auto_connect: bool,

    /// Poll period of the auto-connect loop
    pub connect_interval: Duration,

    /// Timeout applied to every lifecycle request
    pub request_timeout: Duration,

    /// Watch channel settings
    pub watch: WatchConfig,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            grpc_port: DEFAULT_GRPC_PORT,
            http_port: DEFAULT_HTTP_PORT,
            health_period: Duration::from_secs(10),
            retry_limit: 3,
            auto_connect: true,
            connect_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            watch: WatchConfig::default(),
        }
    }
}

impl SdkConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with ports taken from `AGONES_SDK_GRPC_PORT` / `AGONES_SDK_HTTP_PORT` when set
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(port) = port_from_env(GRPC_PORT_ENV)? {
            config.grpc_port = port;
        }
        if let Some(port) = port_from_env(HTTP_PORT_ENV)? {
            config.http_port = port;
        }
        Ok(config)
    }

    /// Set the sidecar host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the gRPC port
    pub fn with_grpc_port(mut self, port: u16) -> Self {
        self.grpc_port = port;
        self
    }

    /// Set the HTTP port
    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Set the health ping period (zero disables)
    pub fn with_health_period(mut self, period: Duration) -> Self {
        self.health_period = period;
        self
    }

    /// Set the request retry limit
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Set whether to auto-connect on startup
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Set the auto-connect poll period
    pub fn with_connect_interval(mut self, interval: Duration) -> Self {
        self.connect_interval = interval;
        self
    }

    /// Set the lifecycle request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the watch channel configuration
    pub fn with_watch(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    /// Set the watch transport
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.watch.transport = transport;
        self
    }

    /// Base URL of the REST gateway, without trailing slash
    pub fn http_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.http_port)
    }

    /// gRPC endpoint URI
    pub fn grpc_endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.grpc_port)
    }

    /// URL of the WebSocket push endpoint
    pub fn websocket_url(&self) -> String {
        // Some WebSocket stacks cannot resolve "localhost"; use the loopback address instead
        let host = if self.host == "localhost" {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        format!("ws://{}:{}/{}", host, self.http_port, WATCH_PATH)
    }

    /// URL of the chunked HTTP push endpoint
    pub fn http_stream_url(&self) -> String {
        format!("{}/{}", self.http_base_url(), WATCH_PATH)
    }
}

fn port_from_env(name: &str) -> Result<Option<u16>> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value.trim().parse::<u16>().map(Some).map_err(|e| {
            SdkError::InvalidConfig(format!("{}='{}' is not a valid port: {}", name, value, e))
        }),
        Err(_) => Ok(None),
    }
}
