/// Error types for the sidecar-sdk library
use thiserror::Error;

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

/// Errors that can occur while talking to the sidecar
#[derive(Debug, Error)]
pub enum SdkError {
    /// gRPC call returned a non-OK status
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    /// gRPC channel could not be established
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// WebSocket connection or protocol failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP request could not be sent or its body could not be read
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Sidecar answered with a non-success status code
    #[error("HTTP status {status}: {body}")]
    HttpStatus {
        /// Response status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// Payload is not valid JSON or does not match the GameServer schema
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Watch stream message is not a valid protobuf GameServer
    #[error("Protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),

    /// Envelope is well-formed JSON but not a `{"result": {...}}` object
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Reassembled message exceeded the configured limit
    #[error("Message too large: {size} bytes (limit {limit})")]
    MessageTooLarge {
        /// Bytes accumulated before the message was discarded
        size: usize,
        /// Configured maximum message size
        limit: usize,
    },

    /// Configuration value could not be used
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request argument rejected before anything was sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Background task is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SdkError {
    /// Whether a request failing with this error is worth sending again
    pub fn is_retryable(&self) -> bool {
        match self {
            SdkError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            SdkError::HttpStatus { status, .. } => *status >= 500,
            SdkError::Timeout(_) | SdkError::Io(_) => true,
            _ => false,
        }
    }
}
