//! Local stand-ins for the sidecar endpoints

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use sidecar_sdk::network::BytesCodec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tonic::codegen::{http, Body, BoxFuture, Context, Poll, Service, StdError};
use tonic::server::{Grpc, NamedService, ServerStreamingService};
use tonic::Status;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn envelope(name: &str, state: &str) -> String {
    format!(
        r#"{{"result":{{"object_meta":{{"name":"{}","generation":"1"}},"status":{{"state":"{}","address":"127.0.0.1","ports":[{{"name":"default","port":7777}}]}}}}}}"#,
        name, state
    )
}

/// WebSocket push endpoint; every accepted connection is handed to the test
pub struct PushServer {
    pub port: u16,
    connections: flume::Receiver<WebSocketStream<TcpStream>>,
}

impl PushServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = flume::unbounded();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => {
                        if tx.send(ws).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("test push server handshake failed: {}", e),
                }
            }
        });
        Self {
            port,
            connections: rx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/watch/gameserver", self.port)
    }

    /// Wait for the next client connection
    pub async fn accept(&self) -> WebSocketStream<TcpStream> {
        tokio::time::timeout(WAIT, self.connections.recv_async())
            .await
            .expect("timed out waiting for a watch connection")
            .unwrap()
    }

    pub fn pending_connections(&self) -> usize {
        self.connections.len()
    }
}

pub async fn push(ws: &mut WebSocketStream<TcpStream>, text: &str) {
    ws.send(Message::text(text)).await.unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// `(method, path, response body)`
pub type Route = (&'static str, &'static str, &'static str);

/// REST gateway answering the configured routes and everything else with `{}`
pub struct RestServer {
    pub port: u16,
    requests: flume::Receiver<Request>,
}

impl RestServer {
    /// Answer `GET /gameserver` with `game_server`
    pub async fn start(game_server: &'static str) -> Self {
        Self::start_with(vec![("GET", "/gameserver", game_server)]).await
    }

    pub async fn start_with(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let routes = Arc::new(routes);
        let (tx, rx) = flume::unbounded();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(serve_one(stream, routes.clone(), tx.clone()));
            }
        });
        Self { port, requests: rx }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.drain().collect()
    }

    pub async fn next_request(&self) -> Request {
        tokio::time::timeout(WAIT, self.requests.recv_async())
            .await
            .expect("timed out waiting for a request")
            .unwrap()
    }
}

async fn serve_one(mut stream: TcpStream, routes: Arc<Vec<Route>>, tx: flume::Sender<Request>) {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        data.extend_from_slice(&chunk[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while data.len() < header_end + content_length {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        data.extend_from_slice(&chunk[..n]);
    }

    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let request = Request {
        method: request_line.next().unwrap_or_default().to_string(),
        path: request_line.next().unwrap_or_default().to_string(),
        body: String::from_utf8_lossy(&data[header_end..]).into_owned(),
    };
    let body = routes
        .iter()
        .find(|(method, path, _)| request.method == *method && request.path == *path)
        .map(|(_, _, body)| *body)
        .unwrap_or("{}");
    let _ = tx.send(request);

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Streaming `GET /watch/gameserver` endpoint writing the chunks the test feeds it
pub struct ChunkedServer {
    pub port: u16,
    streams: flume::Receiver<flume::Sender<String>>,
}

impl ChunkedServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = flume::unbounded();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let (chunk_tx, chunk_rx) = flume::unbounded();
                if tx.send(chunk_tx).is_err() {
                    break;
                }
                tokio::spawn(stream_chunks(stream, chunk_rx));
            }
        });
        Self { port, streams: rx }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/watch/gameserver", self.port)
    }

    /// Wait for the next client; dropping the returned sender ends its response
    pub async fn accept(&self) -> flume::Sender<String> {
        tokio::time::timeout(WAIT, self.streams.recv_async())
            .await
            .expect("timed out waiting for a watch request")
            .unwrap()
    }
}

async fn stream_chunks(mut stream: TcpStream, chunks: flume::Receiver<String>) {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    while !data.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }

    let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n";
    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    while let Ok(chunk) = chunks.recv_async().await {
        let encoded = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
        if stream.write_all(encoded.as_bytes()).await.is_err() {
            return;
        }
        let _ = stream.flush().await;
    }
    let _ = stream.write_all(b"0\r\n\r\n").await;
    let _ = stream.shutdown().await;
}

/// gRPC `agones.dev.sdk.SDK` server whose `WatchGameServer` calls stream raw
/// message bytes fed by the test
pub struct GrpcPushServer {
    pub port: u16,
    calls: flume::Receiver<flume::Sender<Vec<u8>>>,
}

impl GrpcPushServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = flume::unbounded();
        let incoming = futures::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await.map(|(stream, _)| stream);
            Some((accepted, listener))
        });
        tokio::spawn(async move {
            let _ = tonic::transport::Server::builder()
                .add_service(WatchService(tx))
                .serve_with_incoming(Box::pin(incoming))
                .await;
        });
        Self { port, calls: rx }
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Wait for the next watch call; dropping the returned sender ends its stream
    pub async fn accept(&self) -> flume::Sender<Vec<u8>> {
        tokio::time::timeout(WAIT, self.calls.recv_async())
            .await
            .expect("timed out waiting for a watch call")
            .unwrap()
    }
}

#[derive(Clone)]
struct WatchService(flume::Sender<flume::Sender<Vec<u8>>>);

impl NamedService for WatchService {
    const NAME: &'static str = "agones.dev.sdk.SDK";
}

impl<B> Service<http::Request<B>> for WatchService
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let call = WatchCall(self.0.clone());
        Box::pin(async move {
            let mut grpc = Grpc::new(BytesCodec);
            Ok(grpc.server_streaming(call, req).await)
        })
    }
}

struct WatchCall(flume::Sender<flume::Sender<Vec<u8>>>);

impl ServerStreamingService<Vec<u8>> for WatchCall {
    type Response = Vec<u8>;
    type ResponseStream = BoxStream<'static, Result<Vec<u8>, Status>>;
    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;

    fn call(&mut self, _request: tonic::Request<Vec<u8>>) -> Self::Future {
        let (tx, rx) = flume::unbounded();
        let registered = self.0.send(tx);
        Box::pin(async move {
            registered.map_err(|_| Status::unavailable("test finished"))?;
            let stream: Self::ResponseStream = rx.into_stream().map(Ok).boxed();
            Ok(tonic::Response::new(stream))
        })
    }
}
