/// Reassembly of fragmented push messages
use crate::error::{Result, SdkError};

/// Accumulates fragments until the transport signals the end of a message
///
/// Bounded by `limit`. A message that grows past the limit is dropped, and the rest of its
/// fragments are discarded up to and including the final one.
#[derive(Debug)]
pub struct MessageBuffer {
    buf: Vec<u8>,
    limit: usize,
    /// Bytes swallowed so far while skipping an oversized message
    discarding: Option<usize>,
}

impl MessageBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            discarding: None,
        }
    }

    /// Feed one fragment
    ///
    /// Returns `None` while the message is incomplete. Once `is_final` is seen, returns the
    /// complete message or the reason it was dropped, and the buffer is empty again.
    pub fn push(&mut self, data: Vec<u8>, is_final: bool) -> Option<Result<Vec<u8>>> {
        if let Some(dropped) = self.discarding.as_mut() {
            *dropped += data.len();
            if !is_final {
                return None;
            }
            let size = *dropped;
            self.discarding = None;
            return Some(Err(self.too_large(size)));
        }

        let size = self.buf.len() + data.len();
        if size > self.limit {
            // Release the memory right away, the partial message is lost anyway
            self.buf = Vec::new();
            if is_final {
                return Some(Err(self.too_large(size)));
            }
            self.discarding = Some(size);
            return None;
        }

        if is_final && self.buf.is_empty() {
            return Some(Ok(data));
        }

        self.buf.extend_from_slice(&data);
        if is_final {
            Some(Ok(std::mem::take(&mut self.buf)))
        } else {
            None
        }
    }

    /// Forget any partial message
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = None;
    }

    /// Bytes currently held for an incomplete message
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && self.discarding.is_none()
    }

    fn too_large(&self, size: usize) -> SdkError {
        SdkError::MessageTooLarge {
            size,
            limit: self.limit,
        }
    }
}
