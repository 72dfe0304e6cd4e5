/// Chunked HTTP push transport: newline-delimited JSON envelopes
use std::collections::VecDeque;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};

use super::transport::{Frame, Subscription, WatchTransport};
use crate::error::{Result, SdkError};

/// Watch transport over the REST gateway's streaming `GET /watch/gameserver`
///
/// Network chunks do not respect envelope boundaries. Each chunk is cut at newlines and the
/// pieces are handed over as fragments, with the final flag set where a newline was found.
#[derive(Debug, Clone)]
pub struct HttpStreamTransport {
    url: String,
    connect_timeout: Duration,
}

impl HttpStreamTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    async fn open(&self) -> Result<Box<dyn Subscription>> {
        // No overall timeout: the response body never ends while the watch is live
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()?;
        let response = client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SdkError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(Box::new(HttpStreamSubscription {
            chunks: Some(chunks),
            splitter: LineSplitter::default(),
            pending: VecDeque::new(),
        }))
    }
}

impl WatchTransport for HttpStreamTransport {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Subscription>>> {
        self.open().boxed()
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Cuts a byte stream into newline-terminated fragments
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    /// A non-final fragment was emitted and its line is still open
    partial: bool,
}

impl LineSplitter {
    pub(crate) fn split(&mut self, chunk: &[u8], out: &mut VecDeque<Frame>) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let line = &rest[..pos];
            rest = &rest[pos + 1..];
            // Blank keep-alive lines between envelopes carry nothing
            if !self.partial && line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            out.push_back(Frame::Fragment {
                data: line.to_vec(),
                is_final: true,
            });
            self.partial = false;
        }
        if !rest.is_empty() {
            out.push_back(Frame::Fragment {
                data: rest.to_vec(),
                is_final: false,
            });
            self.partial = true;
        }
    }

    pub(crate) fn has_partial(&self) -> bool {
        self.partial
    }
}

struct HttpStreamSubscription {
    chunks: Option<BoxStream<'static, reqwest::Result<Vec<u8>>>>,
    splitter: LineSplitter,
    pending: VecDeque<Frame>,
}

impl HttpStreamSubscription {
    async fn read(&mut self) -> Option<Result<Frame>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            let chunks = self.chunks.as_mut()?;
            match chunks.next().await {
                Some(Ok(chunk)) => self.splitter.split(&chunk, &mut self.pending),
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    if self.splitter.has_partial() {
                        tracing::warn!("HTTP watch stream ended in the middle of a message");
                    }
                    return None;
                }
            }
        }
    }
}

impl Subscription for HttpStreamSubscription {
    fn next_frame(&mut self) -> BoxFuture<'_, Option<Result<Frame>>> {
        self.read().boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        self.chunks = None;
        self.pending.clear();
        futures::future::ready(()).boxed()
    }
}
