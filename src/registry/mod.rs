//! Connection lifecycle management.
//!
//! One live connection per configured server, with explicit status tracking
//! and a fixed-delay reconnect timer. The registry is an ordinary value
//! constructed at startup and disposed at shutdown; there is no module-level
//! singleton. Status changes are broadcast to subscribers at least once per
//! change, with no ordering guarantee across servers.

use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::error::{LensError, LensResult};
use crate::types::{ConnectionEvent, ConnectionState, ServerDescriptor};

/// Upper bound on the initial liveness probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Fixed delay before a scheduled reconnect fires
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 256;

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Tracks one connection per server descriptor
///
/// Cloning is cheap and clones share the same state. `connect` and
/// `disconnect` calls for the same descriptor are not mutually safe against
/// each other: the last caller's action wins. Concurrent read operations
/// against an established connection are safe.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    entries: RwLock<HashMap<String, Entry>>,
    events: broadcast::Sender<ConnectionEvent>,
    probe_timeout: Duration,
    reconnect_delay: Duration,
}

struct Entry {
    descriptor: ServerDescriptor,
    state: ConnectionState,
    handle: Option<MultiplexedConnection>,
    reconnect: Option<JoinHandle<()>>,
}

impl Entry {
    fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            descriptor,
            state: ConnectionState::Disconnected,
            handle: None,
            reconnect: None,
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
    }
}

impl ConnectionRegistry {
    /// Create an empty registry with default probe and reconnect timings
    pub fn new() -> Self {
        Self::with_timings(DEFAULT_PROBE_TIMEOUT, DEFAULT_RECONNECT_DELAY)
    }

    /// Create an empty registry with explicit timings
    pub fn with_timings(probe_timeout: Duration, reconnect_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                entries: RwLock::new(HashMap::new()),
                events,
                probe_timeout,
                reconnect_delay,
            }),
        }
    }

    /// Subscribe to status change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Status changes as a stream, for presentation layers
    ///
    /// A subscriber that falls behind the channel capacity loses the oldest
    /// events; every change is otherwise delivered at least once.
    pub fn event_stream(&self) -> BoxStream<ConnectionEvent> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }

    /// Open (or re-open) the connection for a descriptor
    ///
    /// An existing session for the same identity is closed first. The new
    /// session is probed with a bounded PING before it is considered live.
    /// On probe failure the state moves to Error and a `Connection` error
    /// naming the server is returned. Not safe against a second simultaneous
    /// `connect` for the same identity: the last writer wins.
    pub async fn connect(&self, descriptor: &ServerDescriptor) -> LensResult<()> {
        let key = descriptor.identity();
        {
            let mut entries = self.inner.entries.write();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(descriptor.clone()));
            entry.cancel_reconnect();
            entry.handle = None;
            // Same identity may arrive with a refreshed credential or label
            entry.descriptor = descriptor.clone();
            entry.state = ConnectionState::Connecting;
        }
        self.emit(descriptor, ConnectionState::Connecting);

        match self.open_and_probe(descriptor).await {
            Ok(handle) => {
                {
                    let mut entries = self.inner.entries.write();
                    if let Some(entry) = entries.get_mut(&key) {
                        entry.handle = Some(handle);
                        entry.state = ConnectionState::Connected;
                    }
                }
                self.emit(descriptor, ConnectionState::Connected);
                info!("connected to {}", descriptor.display_name());
                Ok(())
            }
            Err(reason) => {
                {
                    let mut entries = self.inner.entries.write();
                    if let Some(entry) = entries.get_mut(&key) {
                        entry.handle = None;
                        entry.state = ConnectionState::Error;
                    }
                }
                self.emit(descriptor, ConnectionState::Error);
                warn!("connection to {} failed: {}", descriptor.display_name(), reason);
                Err(LensError::Connection {
                    server: descriptor.display_name(),
                    action: "connect".to_string(),
                    reason,
                })
            }
        }
    }

    async fn open_and_probe(&self, descriptor: &ServerDescriptor) -> Result<MultiplexedConnection, String> {
        let client = redis::Client::open(descriptor.connection_info()).map_err(|err| err.to_string())?;

        let mut handle = tokio::time::timeout(
            self.inner.probe_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| format!("connect timed out after {:?}", self.inner.probe_timeout))?
        .map_err(|err| err.to_string())?;

        let probe: Result<Result<String, redis::RedisError>, _> = tokio::time::timeout(
            self.inner.probe_timeout,
            redis::cmd("PING").query_async(&mut handle),
        )
        .await;
        match probe {
            Ok(Ok(_)) => Ok(handle),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("probe timed out after {:?}", self.inner.probe_timeout)),
        }
    }

    /// Close the session and cancel any pending reconnect
    pub fn disconnect(&self, descriptor: &ServerDescriptor) {
        let key = descriptor.identity();
        let known = {
            let mut entries = self.inner.entries.write();
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.cancel_reconnect();
                    entry.handle = None;
                    entry.state = ConnectionState::Disconnected;
                    true
                }
                None => false,
            }
        };
        if known {
            self.emit(descriptor, ConnectionState::Disconnected);
            info!("disconnected from {}", descriptor.display_name());
        }
    }

    /// A live handle for the descriptor, or `NotConnected`
    ///
    /// The returned handle multiplexes commands and may be shared freely by
    /// concurrent callers.
    pub fn get_connection(&self, descriptor: &ServerDescriptor) -> LensResult<MultiplexedConnection> {
        let entries = self.inner.entries.read();
        entries
            .get(&descriptor.identity())
            .filter(|entry| entry.state == ConnectionState::Connected)
            .and_then(|entry| entry.handle.clone())
            .ok_or_else(|| LensError::NotConnected {
                server: descriptor.display_name(),
            })
    }

    /// Tracked state for the descriptor; unknown descriptors read as Disconnected
    pub fn status(&self, descriptor: &ServerDescriptor) -> ConnectionState {
        self.inner
            .entries
            .read()
            .get(&descriptor.identity())
            .map(|entry| entry.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Whether the descriptor currently has a live connection
    pub fn is_connected(&self, descriptor: &ServerDescriptor) -> bool {
        self.status(descriptor) == ConnectionState::Connected
    }

    /// Record an unexpected connection loss and schedule a reconnect
    ///
    /// Called when a runtime command fails at the transport level. Moves the
    /// descriptor to Error and arms the reconnect timer.
    pub fn mark_failed(&self, descriptor: &ServerDescriptor) {
        {
            let mut entries = self.inner.entries.write();
            let entry = entries
                .entry(descriptor.identity())
                .or_insert_with(|| Entry::new(descriptor.clone()));
            entry.handle = None;
            entry.state = ConnectionState::Error;
        }
        self.emit(descriptor, ConnectionState::Error);
        self.schedule_reconnect(descriptor);
    }

    /// Arm the fixed-delay reconnect timer for a descriptor
    ///
    /// At most one timer exists per descriptor: any previous timer is
    /// cancelled before the new one is armed. When the timer fires it
    /// re-invokes `connect` if the descriptor is still not Connected; a
    /// failed attempt re-arms the timer.
    pub fn schedule_reconnect(&self, descriptor: &ServerDescriptor) {
        let registry = self.clone();
        let descriptor = descriptor.clone();
        let delay = self.inner.reconnect_delay;

        let mut entries = self.inner.entries.write();
        let entry = entries
            .entry(descriptor.identity())
            .or_insert_with(|| Entry::new(descriptor.clone()));
        entry.cancel_reconnect();
        debug!("reconnect to {} scheduled in {:?}", descriptor.display_name(), delay);
        entry.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // connect aborts any stored timer handle; this task must shed
            // its own handle before invoking it or it kills itself mid-attempt.
            {
                let mut entries = registry.inner.entries.write();
                if let Some(entry) = entries.get_mut(&descriptor.identity()) {
                    entry.reconnect = None;
                }
            }
            if registry.is_connected(&descriptor) {
                return;
            }
            if registry.connect(&descriptor).await.is_err()
                && registry.status(&descriptor) == ConnectionState::Error
            {
                registry.schedule_reconnect(&descriptor);
            }
        }));
    }

    /// Force-close every session, cancel every timer, clear all state
    ///
    /// Used once at process shutdown.
    pub fn dispose(&self) {
        let drained: Vec<ServerDescriptor> = {
            let mut entries = self.inner.entries.write();
            entries
                .drain()
                .map(|(_, mut entry)| {
                    entry.cancel_reconnect();
                    entry.descriptor
                })
                .collect()
        };
        for descriptor in drained {
            self.emit(&descriptor, ConnectionState::Disconnected);
        }
        info!("connection registry disposed");
    }

    fn emit(&self, descriptor: &ServerDescriptor, state: ConnectionState) {
        let _ = self.inner.events.send(ConnectionEvent {
            server: descriptor.identity(),
            name: descriptor.display_name(),
            state,
        });
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Nothing listens on port 1; connects fail fast with ECONNREFUSED.
    fn unreachable() -> ServerDescriptor {
        let mut descriptor = ServerDescriptor::new("127.0.0.1");
        descriptor.port = 1;
        descriptor
    }

    fn fast_registry() -> ConnectionRegistry {
        ConnectionRegistry::with_timings(Duration::from_millis(200), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_unknown_descriptor_reads_disconnected() {
        let registry = ConnectionRegistry::new();
        let descriptor = unreachable();
        assert_eq!(registry.status(&descriptor), ConnectionState::Disconnected);
        assert!(!registry.is_connected(&descriptor));
    }

    #[tokio::test]
    async fn test_get_connection_requires_connected_state() {
        let registry = ConnectionRegistry::new();
        let descriptor = unreachable();
        let err = registry.get_connection(&descriptor).unwrap_err();
        assert!(matches!(err, LensError::NotConnected { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_connect_sets_error_and_names_server() {
        let registry = fast_registry();
        let descriptor = unreachable();

        let err = registry.connect(&descriptor).await.unwrap_err();
        assert_eq!(registry.status(&descriptor), ConnectionState::Error);
        match err {
            LensError::Connection { server, action, .. } => {
                assert_eq!(server, "127.0.0.1:1");
                assert_eq!(action, "connect");
            }
            other => panic!("expected Connection error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_emits_connecting_then_error_events() {
        let registry = fast_registry();
        let descriptor = unreachable();
        let mut events = registry.subscribe();

        let _ = registry.connect(&descriptor).await;

        let first = events.recv().await.unwrap();
        assert_eq!(first.state, ConnectionState::Connecting);
        assert_eq!(first.server, descriptor.identity());
        let second = events.recv().await.unwrap();
        assert_eq!(second.state, ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_event_stream_yields_status_changes() {
        let registry = fast_registry();
        let descriptor = unreachable();
        let mut events = registry.event_stream();

        let _ = registry.connect(&descriptor).await;

        let first = events.next().await.unwrap();
        assert_eq!(first.state, ConnectionState::Connecting);
        assert_eq!(first.name, "127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let registry = fast_registry();
        let descriptor = unreachable();

        registry.mark_failed(&descriptor);
        registry.disconnect(&descriptor);
        assert_eq!(registry.status(&descriptor), ConnectionState::Disconnected);

        // No reconnect attempt within twice the delay window
        let mut events = registry.subscribe();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(registry.status(&descriptor), ConnectionState::Disconnected);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    async fn next_state(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionState {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("no status change arrived")
            .unwrap()
            .state
    }

    #[tokio::test]
    async fn test_fired_reconnect_attempt_runs_to_completion_and_rearms() {
        let registry = fast_registry();
        let descriptor = unreachable();
        let mut events = registry.subscribe();

        registry.mark_failed(&descriptor);
        assert_eq!(next_state(&mut events).await, ConnectionState::Error);

        // The timer fires and the attempt must run to a terminal state: a
        // Connecting transition followed by Error, never a hang in
        // Connecting with the timer handle consumed.
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Error);
        assert_eq!(registry.status(&descriptor), ConnectionState::Error);

        // A failed attempt re-arms the timer for another full cycle
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Error);

        registry.dispose();
    }

    #[tokio::test]
    async fn test_dispose_clears_all_state() {
        let registry = fast_registry();
        let descriptor = unreachable();

        registry.mark_failed(&descriptor);
        registry.dispose();
        assert_eq!(registry.status(&descriptor), ConnectionState::Disconnected);

        // Disposed timers never fire
        let mut events = registry.subscribe();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
