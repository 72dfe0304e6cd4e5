/// WebSocket push transport on the sidecar HTTP port
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::transport::{Frame, Subscription, WatchTransport};
use crate::error::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Watch transport reading `{"result": ...}` envelopes from a WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> Result<Box<dyn Subscription>> {
        let (ws, response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        tracing::debug!(
            "WebSocket handshake with {} completed: {}",
            self.url,
            response.status()
        );
        Ok(Box::new(WebSocketSubscription { ws: Some(ws) }))
    }
}

impl WatchTransport for WebSocketTransport {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Subscription>>> {
        self.open().boxed()
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

struct WebSocketSubscription {
    ws: Option<WsStream>,
}

impl WebSocketSubscription {
    async fn read(&mut self) -> Option<Result<Frame>> {
        let ws = self.ws.as_mut()?;
        loop {
            // tungstenite reassembles continuation frames, so every message completes an envelope
            match ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::whole(text))),
                Ok(Message::Binary(data)) => return Some(Ok(Frame::whole(data))),
                // tungstenite queues the Pong itself and flushes it on the next read
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Ok(Message::Close(close_frame)) => {
                    tracing::debug!("WebSocket closed by peer: {:?}", close_frame);
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

impl Subscription for WebSocketSubscription {
    fn next_frame(&mut self) -> BoxFuture<'_, Option<Result<Frame>>> {
        self.read().boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        async move {
            if let Some(mut ws) = self.ws.take() {
                if let Err(e) = ws.close(None).await {
                    tracing::debug!("WebSocket close failed: {}", e);
                }
            }
        }
        .boxed()
    }
}
