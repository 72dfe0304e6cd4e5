/// gRPC server-streaming transport for `SDK/WatchGameServer`
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use prost::bytes::{Buf, BufMut};
use prost::Message;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

use super::proto;
use super::transport::{Frame, Subscription, WatchTransport};
use crate::error::Result;

const WATCH_GAME_SERVER_PATH: &str = "/agones.dev.sdk.SDK/WatchGameServer";

/// Codec that moves message bodies as raw bytes
///
/// Watch messages are decoded by the channel, so a corrupt GameServer is
/// counted and dropped instead of failing the whole stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Encode = Vec<u8>;
    type Decode = Vec<u8>;
    type Encoder = BytesCodec;
    type Decoder = BytesCodec;

    fn encoder(&mut self) -> Self::Encoder {
        BytesCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        BytesCodec
    }
}

impl Encoder for BytesCodec {
    type Item = Vec<u8>;
    type Error = Status;

    fn encode(&mut self, item: Vec<u8>, dst: &mut EncodeBuf<'_>) -> std::result::Result<(), Status> {
        dst.put_slice(&item);
        Ok(())
    }
}

impl Decoder for BytesCodec {
    type Item = Vec<u8>;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> std::result::Result<Option<Vec<u8>>, Status> {
        let len = src.remaining();
        Ok(Some(src.copy_to_bytes(len).to_vec()))
    }
}

/// Minimal client for the sidecar `agones.dev.sdk.SDK` service
#[derive(Debug, Clone)]
pub struct SdkClient {
    inner: tonic::client::Grpc<Channel>,
}

impl SdkClient {
    /// Connect to the sidecar gRPC endpoint
    pub async fn connect(endpoint: String, connect_timeout: Duration) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint)?
            .connect_timeout(connect_timeout)
            .connect()
            .await?;
        Ok(Self::new(channel))
    }

    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Open the server-streaming watch call
    pub async fn watch_game_server(
        &mut self,
    ) -> std::result::Result<tonic::Response<tonic::Streaming<Vec<u8>>>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {}", e)))?;
        let path = PathAndQuery::from_static(WATCH_GAME_SERVER_PATH);
        let request = tonic::Request::new(proto::Empty {}.encode_to_vec());
        self.inner
            .server_streaming(request, path, BytesCodec)
            .await
    }
}

/// Watch transport yielding one encoded protobuf GameServer per read
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    endpoint: String,
    connect_timeout: Duration,
}

impl GrpcTransport {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
        }
    }

    async fn open(&self) -> Result<Box<dyn Subscription>> {
        let mut client = SdkClient::connect(self.endpoint.clone(), self.connect_timeout).await?;
        let stream = client.watch_game_server().await?.into_inner();
        Ok(Box::new(GrpcSubscription {
            stream: Some(stream),
        }))
    }
}

impl WatchTransport for GrpcTransport {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Subscription>>> {
        self.open().boxed()
    }

    fn describe(&self) -> String {
        format!("grpc {}", self.endpoint)
    }
}

struct GrpcSubscription {
    stream: Option<tonic::Streaming<Vec<u8>>>,
}

impl Subscription for GrpcSubscription {
    fn next_frame(&mut self) -> BoxFuture<'_, Option<Result<Frame>>> {
        async move {
            let stream = self.stream.as_mut()?;
            match stream.message().await {
                Ok(Some(bytes)) => Some(Ok(Frame::Proto(bytes))),
                Ok(None) => None,
                Err(status) => Some(Err(status.into())),
            }
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        // Dropping the stream cancels the call
        self.stream = None;
        futures::future::ready(()).boxed()
    }
}
