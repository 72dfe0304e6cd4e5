/// Watch channel: one push subscription fanned out to many callbacks
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::decode::{decode_envelope, decode_proto};
use super::reassembly::MessageBuffer;
use super::registry::{CallbackRegistry, SubscriberId, WatchCallback};
use super::stats::{WatchStats, WatchStatsTracker};
use crate::config::WatchConfig;
use crate::error::{Result, SdkError};
use crate::network::{Frame, Subscription, WatchTransport};
use crate::types::GameServer;

/// Longest payload excerpt written to logs for an undecodable message
const LOG_PAYLOAD_LIMIT: usize = 512;

/// Commands sent to the watch task
pub(crate) enum WatchCommand {
    /// Register a callback
    Subscribe {
        id: SubscriberId,
        callback: WatchCallback,
    },
    /// Remove a callback
    Unsubscribe(SubscriberId),
    /// Close the subscription and end the task
    Stop,
}

impl std::fmt::Debug for WatchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchCommand::Subscribe { id, .. } => write!(f, "Subscribe({})", id),
            WatchCommand::Unsubscribe(id) => write!(f, "Unsubscribe({})", id),
            WatchCommand::Stop => write!(f, "Stop"),
        }
    }
}

/// Registration of one callback
///
/// Dropping the handle keeps the callback registered; call [`WatchHandle::unsubscribe`]
/// to remove it.
#[derive(Clone)]
pub struct WatchHandle {
    id: SubscriberId,
    command_tx: flume::Sender<WatchCommand>,
}

impl WatchHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the callback
    ///
    /// Snapshots read after this call are not delivered to it. A snapshot already being
    /// fanned out may still reach it. Returns false if the channel is already shut down.
    pub fn unsubscribe(self) -> bool {
        self.command_tx
            .send(WatchCommand::Unsubscribe(self.id))
            .is_ok()
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").field("id", &self.id).finish()
    }
}

/// Delivers every GameServer update pushed by the sidecar to the registered callbacks
///
/// The subscription, the reassembly buffer and the callbacks are owned by a single watch
/// task. This handle only sends commands to it, so it can be shared freely.
///
/// The first [`subscribe`](Self::subscribe) opens the subscription and arms the periodic
/// liveness check, which re-opens the subscription whenever it is found dead. Connection
/// failures are never reported to subscribers; updates simply pause until the check
/// succeeds again.
pub struct WatchChannel {
    name: String,
    command_tx: flume::Sender<WatchCommand>,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    stats: WatchStatsTracker,
    task: Option<JoinHandle<()>>,
}

impl WatchChannel {
    /// Create the channel and spawn its task on the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new<T: WatchTransport>(transport: T, config: &WatchConfig) -> Self {
        Self::with_handle(transport, config, &tokio::runtime::Handle::current())
    }

    /// Create the channel and spawn its task on the given runtime
    pub fn with_handle<T: WatchTransport>(
        transport: T,
        config: &WatchConfig,
        handle: &tokio::runtime::Handle,
    ) -> Self {
        let (mut channel, driver) = Self::unspawned(transport, config);
        channel.task = Some(handle.spawn(driver.run()));
        channel
    }

    /// Create the channel without starting it
    ///
    /// Nothing happens until the returned [`WatchDriver`] is run by the caller, on whatever
    /// task or thread it chooses.
    pub fn unspawned<T: WatchTransport>(transport: T, config: &WatchConfig) -> (Self, WatchDriver) {
        let (command_tx, command_rx) = flume::unbounded();
        let connected = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let stats = WatchStatsTracker::new();
        let name = transport.describe();

        let driver = WatchDriver {
            name: name.clone(),
            transport: Arc::new(transport),
            command_rx,
            connected: connected.clone(),
            reconnect_interval: config.reconnect_interval.max(Duration::from_millis(1)),
            connect_timeout: config.connect_timeout,
            core: WatchCore::new(config.max_message_size, stats.clone(), closed.clone()),
        };
        let channel = Self {
            name,
            command_tx,
            next_id: AtomicU64::new(1),
            connected,
            closed,
            stats,
            task: None,
        };
        (channel, driver)
    }

    /// Register a callback for every future snapshot
    ///
    /// Never blocks. Opens the subscription if none is live. Snapshots delivered before
    /// the registration are not replayed.
    pub fn subscribe<F>(&self, callback: F) -> WatchHandle
    where
        F: FnMut(Arc<GameServer>) + Send + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let command = WatchCommand::Subscribe {
            id,
            callback: Box::new(callback),
        };
        if self.command_tx.send(command).is_err() {
            tracing::warn!("Watch '{}' is shut down, callback {} ignored", self.name, id);
        }
        WatchHandle {
            id,
            command_tx: self.command_tx.clone(),
        }
    }

    /// Whether a subscription is currently live
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether teardown has started
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Endpoint this channel watches
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current watch statistics
    pub fn stats(&self) -> WatchStats {
        self.stats.get_stats()
    }

    /// Stop delivering, close the subscription and wait for the task to finish
    pub async fn shutdown(mut self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        // The task may already be gone, nothing left to stop then
        let _ = self.command_tx.send(WatchCommand::Stop);
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| {
                SdkError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
            })?;
        }
        tracing::info!("Watch '{}' shut down", self.name);
        Ok(())
    }
}

impl Drop for WatchChannel {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.command_tx.send(WatchCommand::Stop);
    }
}

impl std::fmt::Debug for WatchChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchChannel")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Decode and fan-out state of the watch task
#[derive(Debug)]
pub(crate) struct WatchCore {
    registry: CallbackRegistry,
    buffer: MessageBuffer,
    stats: WatchStatsTracker,
    closed: Arc<AtomicBool>,
}

impl WatchCore {
    pub(crate) fn new(
        max_message_size: usize,
        stats: WatchStatsTracker,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry: CallbackRegistry::new(),
            buffer: MessageBuffer::new(max_message_size),
            stats,
            closed,
        }
    }

    /// Handle one frame from the subscription
    ///
    /// Whole messages are decoded at once; fragments are buffered until the final one.
    /// A decoded snapshot is handed to every callback in registration order and returned.
    /// Messages that cannot be decoded are logged, counted and dropped.
    pub(crate) fn deliver(&mut self, frame: Frame) -> Option<Arc<GameServer>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.stats.add_frame(frame.len());

        let (decoded, message) = match frame {
            Frame::Proto(data) => (decode_proto(&data), data),
            Frame::Fragment { data, is_final } => {
                let message = match self.buffer.push(data, is_final)? {
                    Ok(message) => message,
                    Err(e) => {
                        self.stats.add_decode_failure();
                        tracing::error!("Dropping watch message: {}", e);
                        return None;
                    }
                };
                (decode_envelope(&message), message)
            }
        };
        let snapshot = match decoded {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                self.stats.add_decode_failure();
                tracing::error!(
                    "Failed to parse watch message: {}: {}",
                    e,
                    payload_excerpt(&message)
                );
                return None;
            }
        };

        // Counted before the fan-out, callbacks may read the stats
        self.stats.add_snapshot();
        let outcome = self
            .registry
            .broadcast(&snapshot, &self.closed, &self.stats);
        if outcome.interrupted {
            tracing::debug!("Watch closed during fan-out, remaining callbacks skipped");
            return None;
        }
        tracing::debug!(
            "Delivered GameServer '{}' ({}) to {} callbacks",
            snapshot.name(),
            snapshot.state(),
            outcome.delivered
        );
        Some(snapshot)
    }

    /// Drop any partial message left by a dead subscription
    pub(crate) fn reset_buffer(&mut self) {
        self.buffer.clear();
    }
}

fn payload_excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(&bytes[..bytes.len().min(LOG_PAYLOAD_LIMIT)]);
    if bytes.len() > LOG_PAYLOAD_LIMIT {
        format!("{}... ({} bytes)", text, bytes.len())
    } else {
        text.into_owned()
    }
}

type ConnectFuture = BoxFuture<'static, Result<Box<dyn Subscription>>>;

/// The watch task
///
/// Owns the transport, the live subscription and the [`WatchCore`]. Runs until a `Stop`
/// command arrives or every [`WatchChannel`] handle is gone.
pub struct WatchDriver {
    name: String,
    transport: Arc<dyn WatchTransport>,
    command_rx: flume::Receiver<WatchCommand>,
    connected: Arc<AtomicBool>,
    reconnect_interval: Duration,
    connect_timeout: Duration,
    core: WatchCore,
}

impl WatchDriver {
    /// Run the task loop to completion
    pub async fn run(mut self) {
        let mut subscription: Option<Box<dyn Subscription>> = None;
        let mut connecting: Option<ConnectFuture> = None;
        let mut armed = false;

        let mut liveness_check = tokio::time::interval_at(
            Instant::now() + self.reconnect_interval,
            self.reconnect_interval,
        );
        liveness_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                // Commands first so a callback registered before a frame arrives receives it
                command = self.command_rx.recv_async() => match command {
                    Err(_) => {
                        tracing::info!("Watch '{}' command channel closed", self.name);
                        break;
                    }
                    Ok(WatchCommand::Stop) => {
                        tracing::info!("Watch '{}' received Stop command, exiting", self.name);
                        break;
                    }
                    Ok(WatchCommand::Subscribe { id, callback }) => {
                        tracing::debug!("Watch '{}' registered callback {}", self.name, id);
                        self.core.registry.insert(id, callback);
                        if !armed {
                            armed = true;
                            liveness_check.reset();
                        }
                        if subscription.is_none() && connecting.is_none() {
                            connecting = Some(self.connect());
                        }
                    }
                    Ok(WatchCommand::Unsubscribe(id)) => {
                        if self.core.registry.remove(id) {
                            tracing::debug!("Watch '{}' removed callback {}", self.name, id);
                        }
                    }
                },
                // Connection attempt finished
                result = poll_connect(&mut connecting) => {
                    connecting = None;
                    match result {
                        Ok(opened) => {
                            tracing::info!("Watch '{}' connected", self.name);
                            self.core.reset_buffer();
                            self.core.stats.add_subscription();
                            self.connected.store(true, Ordering::Release);
                            subscription = Some(opened);
                        }
                        Err(e) => {
                            self.core.stats.add_connect_failure();
                            tracing::warn!(
                                "Watch '{}' could not connect, retrying in {:?}: {}",
                                self.name,
                                self.reconnect_interval,
                                e
                            );
                        }
                    }
                }
                // Periodic liveness check
                _ = liveness_check.tick(), if armed => {
                    if subscription.is_none() && connecting.is_none() {
                        tracing::debug!("Watch '{}' not connected, reconnecting", self.name);
                        connecting = Some(self.connect());
                    }
                }
                // Data from the live subscription
                frame = next_frame(&mut subscription) => match frame {
                    Some(Ok(frame)) => {
                        self.core.deliver(frame);
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Watch '{}' subscription failed: {}", self.name, e);
                        self.disconnect(&mut subscription);
                    }
                    None => {
                        tracing::info!("Watch '{}' subscription closed by the sidecar", self.name);
                        self.disconnect(&mut subscription);
                    }
                }
            }
        }

        self.core.closed.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        if let Some(mut subscription) = subscription.take() {
            subscription.close().await;
        }
        tracing::debug!("Watch '{}' task finished", self.name);
    }

    fn connect(&self) -> ConnectFuture {
        let transport = self.transport.clone();
        let timeout = self.connect_timeout;
        async move {
            match tokio::time::timeout(timeout, transport.connect()).await {
                Ok(result) => result,
                Err(_) => Err(SdkError::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    transport.describe(),
                    timeout
                ))),
            }
        }
        .boxed()
    }

    fn disconnect(&mut self, subscription: &mut Option<Box<dyn Subscription>>) {
        *subscription = None;
        self.connected.store(false, Ordering::Release);
        self.core.reset_buffer();
        self.core.stats.add_disconnect();
    }
}

async fn poll_connect(connecting: &mut Option<ConnectFuture>) -> Result<Box<dyn Subscription>> {
    match connecting.as_mut() {
        Some(future) => future.await,
        None => futures::future::pending().await,
    }
}

async fn next_frame(subscription: &mut Option<Box<dyn Subscription>>) -> Option<Result<Frame>> {
    match subscription.as_mut() {
        Some(subscription) => subscription.next_frame().await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const WAIT: Duration = Duration::from_secs(2);

    /// Subscription fed by the test through a flume channel; dropping the sender ends it
    struct MockSubscription {
        frames: flume::Receiver<Result<Frame>>,
        closed: Arc<AtomicBool>,
    }

    impl Subscription for MockSubscription {
        fn next_frame(&mut self) -> BoxFuture<'_, Option<Result<Frame>>> {
            async move { self.frames.recv_async().await.ok() }.boxed()
        }

        fn close(&mut self) -> BoxFuture<'_, ()> {
            self.closed.store(true, Ordering::SeqCst);
            futures::future::ready(()).boxed()
        }
    }

    struct SubscriptionFeed {
        frames: flume::Sender<Result<Frame>>,
        closed: Arc<AtomicBool>,
    }

    impl SubscriptionFeed {
        fn send(&self, data: &str, bytes_remaining: usize) {
            self.frames
                .send(Ok(Frame::raw(data.as_bytes().to_vec(), bytes_remaining)))
                .unwrap();
        }
    }

    /// Transport handing out queued subscriptions; connecting with an empty queue fails
    struct MockTransport {
        queue: flume::Receiver<MockSubscription>,
        connects: Arc<AtomicUsize>,
    }

    impl WatchTransport for MockTransport {
        fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Subscription>>> {
            async move {
                self.connects.fetch_add(1, Ordering::SeqCst);
                match self.queue.try_recv() {
                    Ok(subscription) => Ok(Box::new(subscription) as Box<dyn Subscription>),
                    Err(_) => Err(SdkError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "no subscription queued",
                    ))),
                }
            }
            .boxed()
        }

        fn describe(&self) -> String {
            "mock".to_string()
        }
    }

    struct Harness {
        queue: flume::Sender<MockSubscription>,
        connects: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> (Self, MockTransport) {
            let (queue_tx, queue_rx) = flume::unbounded();
            let connects = Arc::new(AtomicUsize::new(0));
            let transport = MockTransport {
                queue: queue_rx,
                connects: connects.clone(),
            };
            (
                Self {
                    queue: queue_tx,
                    connects,
                },
                transport,
            )
        }

        fn queue_subscription(&self) -> SubscriptionFeed {
            let (frames_tx, frames_rx) = flume::unbounded();
            let closed = Arc::new(AtomicBool::new(false));
            self.queue
                .send(MockSubscription {
                    frames: frames_rx,
                    closed: closed.clone(),
                })
                .unwrap();
            SubscriptionFeed {
                frames: frames_tx,
                closed,
            }
        }
    }

    fn test_config() -> WatchConfig {
        WatchConfig::default()
            .with_reconnect_interval(Duration::from_millis(50))
            .with_connect_timeout(Duration::from_millis(500))
    }

    fn forward_to(tx: flume::Sender<Arc<GameServer>>) -> impl FnMut(Arc<GameServer>) + Send {
        move |gs| {
            let _ = tx.send(gs);
        }
    }

    async fn recv(rx: &flume::Receiver<Arc<GameServer>>) -> Arc<GameServer> {
        tokio::time::timeout(WAIT, rx.recv_async())
            .await
            .expect("timed out waiting for a snapshot")
            .unwrap()
    }

    fn envelope(name: &str, state: &str) -> String {
        format!(
            r#"{{"result":{{"object_meta":{{"name":"{}"}},"status":{{"state":"{}"}}}}}}"#,
            name, state
        )
    }

    fn core() -> WatchCore {
        WatchCore::new(
            1 << 20,
            WatchStatsTracker::new(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_fragmented_envelope_delivers_one_snapshot() {
        let mut core = core();
        let (tx, rx) = flume::unbounded();
        core.registry.insert(SubscriberId(1), Box::new(forward_to(tx)));

        assert!(core.deliver(Frame::raw(b"{\"resu".to_vec(), 60)).is_none());
        let delivered = core
            .deliver(Frame::raw(
                br#"lt":{"object_meta":{"name":"gs-1"},"status":{"state":"Ready"}}}"#.to_vec(),
                0,
            ))
            .unwrap();

        assert_eq!(delivered.name(), "gs-1");
        assert_eq!(delivered.state(), "Ready");
        assert_eq!(rx.drain().count(), 1);

        let whole = decode_envelope(envelope("gs-1", "Ready").as_bytes()).unwrap();
        assert_eq!(*delivered, whole);
    }

    #[test]
    fn test_every_split_point_gives_the_same_snapshot() {
        let message = envelope("gs-9", "Allocated");
        let expected = decode_envelope(message.as_bytes()).unwrap();
        let bytes = message.as_bytes();

        for split in 1..bytes.len() {
            let mut core = core();
            assert!(core
                .deliver(Frame::raw(bytes[..split].to_vec(), bytes.len() - split))
                .is_none());
            let delivered = core.deliver(Frame::raw(bytes[split..].to_vec(), 0)).unwrap();
            assert_eq!(*delivered, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_missing_result_is_dropped_and_counted() {
        let mut core = core();
        let (tx, rx) = flume::unbounded();
        core.registry.insert(SubscriberId(1), Box::new(forward_to(tx)));

        assert!(core.deliver(Frame::whole(br#"{"bogus":true}"#.to_vec())).is_none());
        assert!(rx.is_empty());

        let stats = core.stats.get_stats();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.snapshots_delivered, 0);
    }

    #[test]
    fn test_buffer_is_cleared_after_malformed_message() {
        let mut core = core();

        for malformed in [&b"[1,2"[..], &b"{\"result\":"[..], &b"\"text\""[..]] {
            assert!(core.deliver(Frame::raw(malformed[..1].to_vec(), 1)).is_none());
            assert!(core.deliver(Frame::raw(malformed[1..].to_vec(), 0)).is_none());
            assert!(core.buffer.is_empty());
        }

        let delivered = core.deliver(Frame::whole(envelope("gs-2", "Ready"))).unwrap();
        assert_eq!(delivered.name(), "gs-2");
        assert_eq!(core.stats.get_stats().decode_failures, 3);
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let mut core = core();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for tag in ["A", "B"] {
            let order = order.clone();
            let id = SubscriberId(if tag == "A" { 1 } else { 2 });
            core.registry.insert(
                id,
                Box::new(move |gs: Arc<GameServer>| {
                    order.lock().unwrap().push((tag, gs));
                }),
            );
        }

        core.deliver(Frame::whole(envelope("gs-1", "Ready"))).unwrap();

        let order = order.lock().unwrap();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].0, "A");
        assert_eq!(order[1].0, "B");
        assert!(Arc::ptr_eq(&order[0].1, &order[1].1));
    }

    #[test]
    fn test_proto_frame_is_delivered_whole() {
        let mut core = core();
        let msg = crate::network::proto::GameServer {
            object_meta: Some(crate::network::proto::game_server::ObjectMeta {
                name: "gs-grpc".to_string(),
                ..Default::default()
            }),
            spec: None,
            status: None,
        };
        let delivered = core.deliver(Frame::proto(&msg)).unwrap();
        assert_eq!(delivered.name(), "gs-grpc");
    }

    #[test]
    fn test_corrupt_proto_frame_is_dropped_and_counted() {
        let mut core = core();
        let (tx, rx) = flume::unbounded();
        core.registry.insert(SubscriberId(1), Box::new(forward_to(tx)));

        assert!(core.deliver(Frame::Proto(vec![0x0a, 0x05, 0x01])).is_none());
        assert!(rx.is_empty());

        let msg = crate::network::proto::GameServer {
            object_meta: Some(crate::network::proto::game_server::ObjectMeta {
                name: "gs-after".to_string(),
                ..Default::default()
            }),
            spec: None,
            status: None,
        };
        assert_eq!(core.deliver(Frame::proto(&msg)).unwrap().name(), "gs-after");

        let stats = core.stats.get_stats();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.snapshots_delivered, 1);
    }

    #[test]
    fn test_stats_are_current_inside_callbacks() {
        let mut core = core();
        let stats = core.stats.clone();
        let (tx, rx) = flume::unbounded();
        core.registry.insert(
            SubscriberId(1),
            Box::new(move |_gs: Arc<GameServer>| {
                let _ = tx.send(stats.get_stats().snapshots_delivered);
            }),
        );

        core.deliver(Frame::whole(envelope("gs-1", "Ready"))).unwrap();
        core.deliver(Frame::whole(envelope("gs-1", "Allocated"))).unwrap();
        assert_eq!(rx.drain().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_closed_core_delivers_nothing() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut core = WatchCore::new(1024, WatchStatsTracker::new(), closed.clone());
        let (tx, rx) = flume::unbounded();
        core.registry.insert(SubscriberId(1), Box::new(forward_to(tx)));

        closed.store(true, Ordering::SeqCst);
        assert!(core.deliver(Frame::whole(envelope("gs-1", "Ready"))).is_none());
        assert!(rx.is_empty());
    }

    #[test]
    fn test_payload_excerpt_truncates() {
        let long = vec![b'x'; LOG_PAYLOAD_LIMIT + 10];
        let excerpt = payload_excerpt(&long);
        assert!(excerpt.ends_with(&format!("... ({} bytes)", LOG_PAYLOAD_LIMIT + 10)));
        assert_eq!(payload_excerpt(b"short"), "short");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_no_connection_before_first_subscribe() {
        let (harness, transport) = Harness::new();
        let channel = WatchChannel::new(transport, &test_config());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.connects.load(Ordering::SeqCst), 0);
        assert!(!channel.is_connected());

        channel.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_subscribe_connects_and_delivers() {
        let (harness, transport) = Harness::new();
        let feed = harness.queue_subscription();
        feed.send("{\"resu", 10);
        feed.send(
            r#"lt":{"object_meta":{"name":"gs-1"},"status":{"state":"Ready"}}}"#,
            0,
        );

        let channel = WatchChannel::new(transport, &test_config());
        let (tx, rx) = flume::unbounded();
        let _handle = channel.subscribe(forward_to(tx));

        let gs = recv(&rx).await;
        assert_eq!(gs.name(), "gs-1");
        assert_eq!(gs.state(), "Ready");
        assert!(channel.is_connected());
        assert_eq!(harness.connects.load(Ordering::SeqCst), 1);

        let stats = channel.stats();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.snapshots_delivered, 1);
        assert_eq!(stats.subscriptions_opened, 1);

        channel.shutdown().await.unwrap();
        assert!(feed.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_late_subscriber_gets_no_replay() {
        let (harness, transport) = Harness::new();
        let feed = harness.queue_subscription();
        let channel = WatchChannel::new(transport, &test_config());

        let (first_tx, first_rx) = flume::unbounded();
        channel.subscribe(forward_to(first_tx));
        feed.send(&envelope("gs-1", "Scheduled"), 0);
        assert_eq!(recv(&first_rx).await.state(), "Scheduled");

        let (late_tx, late_rx) = flume::unbounded();
        channel.subscribe(forward_to(late_tx));
        feed.send(&envelope("gs-1", "Ready"), 0);

        assert_eq!(recv(&first_rx).await.state(), "Ready");
        assert_eq!(recv(&late_rx).await.state(), "Ready");
        assert!(late_rx.is_empty());
        // A second subscribe does not open a second subscription
        assert_eq!(harness.connects.load(Ordering::SeqCst), 1);

        channel.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_reconnects_after_stream_end() {
        let (harness, transport) = Harness::new();
        let first = harness.queue_subscription();
        let channel = WatchChannel::new(transport, &test_config());

        let (tx, rx) = flume::unbounded();
        channel.subscribe(forward_to(tx));
        first.send(&envelope("gs-1", "Ready"), 0);
        assert_eq!(recv(&rx).await.state(), "Ready");

        // Leave a partial message behind, then end the stream
        first.send("{\"result\":{\"object", 5);
        drop(first);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = harness.queue_subscription();
        second.send(&envelope("gs-1", "Allocated"), 0);

        let gs = recv(&rx).await;
        assert_eq!(gs.state(), "Allocated");
        assert!(channel.is_connected());

        let stats = channel.stats();
        assert_eq!(stats.disconnects, 1);
        assert_eq!(stats.subscriptions_opened, 2);
        assert_eq!(stats.decode_failures, 0);

        channel.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_failed_connect_is_retried() {
        let (harness, transport) = Harness::new();
        let channel = WatchChannel::new(transport, &test_config());

        let (tx, rx) = flume::unbounded();
        channel.subscribe(forward_to(tx));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!channel.is_connected());
        assert!(channel.stats().connect_failures >= 1);

        let feed = harness.queue_subscription();
        feed.send(&envelope("gs-3", "Ready"), 0);

        assert_eq!(recv(&rx).await.name(), "gs-3");
        assert!(harness.connects.load(Ordering::SeqCst) >= 2);

        channel.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_transport_error_triggers_reconnect() {
        let (harness, transport) = Harness::new();
        let first = harness.queue_subscription();
        let channel = WatchChannel::new(transport, &test_config());

        let (tx, rx) = flume::unbounded();
        channel.subscribe(forward_to(tx));
        first
            .frames
            .send(Err(SdkError::Timeout("read".to_string())))
            .unwrap();

        let second = harness.queue_subscription();
        second.send(&envelope("gs-4", "Ready"), 0);

        assert_eq!(recv(&rx).await.name(), "gs-4");
        assert_eq!(channel.stats().disconnects, 1);

        channel.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_unsubscribe_stops_delivery() {
        let (harness, transport) = Harness::new();
        let feed = harness.queue_subscription();
        let channel = WatchChannel::new(transport, &test_config());

        let (kept_tx, kept_rx) = flume::unbounded();
        let (gone_tx, gone_rx) = flume::unbounded();
        channel.subscribe(forward_to(kept_tx));
        let gone = channel.subscribe(forward_to(gone_tx));

        feed.send(&envelope("gs-1", "Ready"), 0);
        recv(&kept_rx).await;
        recv(&gone_rx).await;

        assert!(gone.unsubscribe());
        feed.send(&envelope("gs-1", "Allocated"), 0);
        assert_eq!(recv(&kept_rx).await.state(), "Allocated");
        assert!(gone_rx.is_empty());

        channel.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_panicking_callback_does_not_stop_others() {
        let (harness, transport) = Harness::new();
        let feed = harness.queue_subscription();
        let channel = WatchChannel::new(transport, &test_config());

        channel.subscribe(|_gs| panic!("subscriber bug"));
        let (tx, rx) = flume::unbounded();
        channel.subscribe(forward_to(tx));

        feed.send(&envelope("gs-1", "Ready"), 0);
        feed.send(&envelope("gs-1", "Allocated"), 0);
        assert_eq!(recv(&rx).await.state(), "Ready");
        assert_eq!(recv(&rx).await.state(), "Allocated");
        assert_eq!(channel.stats().callback_failures, 2);

        channel.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_shutdown_stops_delivery() {
        let (harness, transport) = Harness::new();
        let feed = harness.queue_subscription();
        let channel = WatchChannel::new(transport, &test_config());

        let (tx, rx) = flume::unbounded();
        let handle = channel.subscribe(forward_to(tx));
        feed.send(&envelope("gs-1", "Ready"), 0);
        recv(&rx).await;

        channel.shutdown().await.unwrap();
        assert!(feed.closed.load(Ordering::SeqCst));
        assert!(feed.frames.send(Ok(Frame::whole(envelope("gs-1", "Shutdown")))).is_err());
        assert!(!handle.unsubscribe());
        assert!(rx.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_during_fan_out_skips_remaining_callbacks() {
        let (harness, transport) = Harness::new();
        let feed = harness.queue_subscription();
        let channel = WatchChannel::new(transport, &test_config());

        let (started_tx, started_rx) = flume::unbounded();
        channel.subscribe(move |_gs| {
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(300));
        });
        let (tx, rx) = flume::unbounded();
        channel.subscribe(forward_to(tx));

        feed.send(&envelope("gs-1", "Ready"), 0);
        tokio::time::timeout(WAIT, started_rx.recv_async())
            .await
            .unwrap()
            .unwrap();

        // First callback is still sleeping inside the fan-out
        channel.shutdown().await.unwrap();
        assert!(rx.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_unspawned_driver_run_by_caller() {
        let (harness, transport) = Harness::new();
        let feed = harness.queue_subscription();
        let (channel, driver) = WatchChannel::unspawned(transport, &test_config());
        let task = tokio::spawn(driver.run());

        let (tx, rx) = flume::unbounded();
        channel.subscribe(forward_to(tx));
        feed.send(&envelope("gs-5", "Ready"), 0);
        assert_eq!(recv(&rx).await.name(), "gs-5");

        drop(channel);
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(feed.closed.load(Ordering::SeqCst));
    }
}
