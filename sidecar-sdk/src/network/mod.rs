//! Network layer for sidecar-sdk

pub mod alpha;
pub mod beta;
pub mod grpc_transport;
pub mod http_client;
pub mod http_stream_transport;
pub mod proto;
pub mod transport;
pub mod ws_transport;

pub use alpha::Alpha;
pub use beta::Beta;
pub use grpc_transport::{BytesCodec, GrpcTransport, SdkClient};
pub use http_client::LifecycleClient;
pub use http_stream_transport::HttpStreamTransport;
pub use transport::{Frame, Subscription, Transport, WatchTransport};
pub use ws_transport::WebSocketTransport;
