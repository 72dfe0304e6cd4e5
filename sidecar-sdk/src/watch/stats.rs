//! Statistics tracking for the watch channel

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of watch channel counters
#[derive(Debug, Clone)]
pub struct WatchStats {
    /// Frames read from the transport
    pub frames_received: u64,
    /// Payload bytes read from the transport
    pub bytes_received: u64,
    /// Snapshots decoded and fanned out
    pub snapshots_delivered: u64,
    /// Messages dropped because they could not be decoded (or were too large)
    pub decode_failures: u64,
    /// Callback invocations that panicked
    pub callback_failures: u64,
    /// Subscriptions successfully opened
    pub subscriptions_opened: u64,
    /// Failed connection attempts
    pub connect_failures: u64,
    /// Live subscriptions that ended
    pub disconnects: u64,
    /// Time since the channel was created
    pub uptime: Duration,
}

impl std::fmt::Display for WatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frames: {} ({} bytes), Snapshots: {}, Decode failures: {}, Callback failures: {}, \
             Connects: {} ok / {} failed, Disconnects: {}, Uptime: {:.1}s",
            self.frames_received,
            self.bytes_received,
            self.snapshots_delivered,
            self.decode_failures,
            self.callback_failures,
            self.subscriptions_opened,
            self.connect_failures,
            self.disconnects,
            self.uptime.as_secs_f64()
        )
    }
}

/// Thread-safe counters shared between the watch task and its handles
///
/// Uses atomic operations for lock-free concurrent updates
#[derive(Debug, Clone)]
pub struct WatchStatsTracker {
    inner: Arc<Counters>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    snapshots_delivered: AtomicU64,
    decode_failures: AtomicU64,
    callback_failures: AtomicU64,
    subscriptions_opened: AtomicU64,
    connect_failures: AtomicU64,
    disconnects: AtomicU64,
}

impl WatchStatsTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Counters::default()),
            start_time: Instant::now(),
        }
    }

    pub fn add_frame(&self, bytes: usize) {
        self.inner.frames_received.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_snapshot(&self) {
        self.inner.snapshots_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_decode_failure(&self) {
        self.inner.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_callback_failures(&self, count: usize) {
        self.inner
            .callback_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_subscription(&self) {
        self.inner
            .subscriptions_opened
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_connect_failure(&self) {
        self.inner.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_disconnect(&self) {
        self.inner.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn get_stats(&self) -> WatchStats {
        let c = &self.inner;
        WatchStats {
            frames_received: c.frames_received.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            snapshots_delivered: c.snapshots_delivered.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            callback_failures: c.callback_failures.load(Ordering::Relaxed),
            subscriptions_opened: c.subscriptions_opened.load(Ordering::Relaxed),
            connect_failures: c.connect_failures.load(Ordering::Relaxed),
            disconnects: c.disconnects.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed(),
        }
    }
}

impl Default for WatchStatsTracker {
    fn default() -> Self {
        Self::new()
    }
}
