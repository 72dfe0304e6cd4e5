/// Transport seam between the watch channel and the sidecar push sources
use futures::future::BoxFuture;

use super::grpc_transport::GrpcTransport;
use super::http_stream_transport::HttpStreamTransport;
use super::proto;
use super::ws_transport::WebSocketTransport;
use crate::config::{SdkConfig, TransportKind};
use crate::error::Result;

/// Unit of data handed from a subscription to the watch channel
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// One complete protobuf-encoded GameServer (whole-message transports), decoded by the
    /// channel
    Proto(Vec<u8>),
    /// Raw JSON bytes that may be only part of an envelope
    Fragment {
        /// Bytes of this chunk
        data: Vec<u8>,
        /// True when no bytes remain for the current message
        is_final: bool,
    },
}

impl Frame {
    /// Build a fragment from a chunk and the count of bytes still expected for its message
    pub fn raw(data: impl Into<Vec<u8>>, bytes_remaining: usize) -> Self {
        Frame::Fragment {
            data: data.into(),
            is_final: bytes_remaining == 0,
        }
    }

    /// An encoded protobuf message
    pub fn proto(msg: &proto::GameServer) -> Self {
        Frame::Proto(prost::Message::encode_to_vec(msg))
    }

    /// A fragment that completes its message on its own
    pub fn whole(data: impl Into<Vec<u8>>) -> Self {
        Self::raw(data, 0)
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Frame::Proto(data) | Frame::Fragment { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One live push connection
///
/// Owned by exactly one watch task. `next_frame` returning `None` or an error ends it.
pub trait Subscription: Send {
    /// Wait for the next frame
    fn next_frame(&mut self) -> BoxFuture<'_, Option<Result<Frame>>>;

    /// Close the connection, best effort
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Factory of subscriptions to a push source
pub trait WatchTransport: Send + Sync + 'static {
    /// Open a new subscription
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Subscription>>>;

    /// Human readable endpoint, for logs
    fn describe(&self) -> String;
}

/// Built-in transports, selected at construction time
#[derive(Debug, Clone)]
pub enum Transport {
    Grpc(GrpcTransport),
    WebSocket(WebSocketTransport),
    HttpStream(HttpStreamTransport),
}

impl Transport {
    /// Build the transport named by the configuration
    pub fn from_config(config: &SdkConfig) -> Self {
        match config.watch.transport {
            TransportKind::Grpc => Transport::Grpc(GrpcTransport::new(
                config.grpc_endpoint(),
                config.watch.connect_timeout,
            )),
            TransportKind::WebSocket => {
                Transport::WebSocket(WebSocketTransport::new(config.websocket_url()))
            }
            TransportKind::HttpStream => Transport::HttpStream(HttpStreamTransport::new(
                config.http_stream_url(),
                config.watch.connect_timeout,
            )),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Grpc(_) => TransportKind::Grpc,
            Transport::WebSocket(_) => TransportKind::WebSocket,
            Transport::HttpStream(_) => TransportKind::HttpStream,
        }
    }
}

impl WatchTransport for Transport {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Subscription>>> {
        match self {
            Transport::Grpc(t) => t.connect(),
            Transport::WebSocket(t) => t.connect(),
            Transport::HttpStream(t) => t.connect(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Transport::Grpc(t) => t.describe(),
            Transport::WebSocket(t) => t.describe(),
            Transport::HttpStream(t) => t.describe(),
        }
    }
}
