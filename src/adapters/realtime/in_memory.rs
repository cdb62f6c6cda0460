//! In-memory push transport for testing.
//!
//! Stands in for the socket-based push channel. Tests drive it directly:
//! `emit` delivers a message to every open connection, `drop_connection`
//! simulates the server going away.
//!
//! # Security Note
//!
//! This adapter is for **testing only**. It uses `.expect()` on lock
//! operations which will panic if locks are poisoned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;

use crate::domain::foundation::{ConnectionId, TenantId};
use crate::ports::{InboundSink, PushConnection, PushTransport, TransportError};

#[derive(Default)]
struct TransportState {
    fail_next_opens: usize,
    open_delay: Option<Duration>,
    open_count: usize,
    connections: Vec<Arc<InMemoryConnection>>,
    auth_tokens: Vec<Option<String>>,
}

/// In-memory push transport.
///
/// # Panics
///
/// Methods may panic if internal locks are poisoned. This is acceptable
/// for test code but this adapter should NOT be used in production.
///
/// # Example
///
/// ```ignore
/// let transport = Arc::new(InMemoryPushTransport::new());
/// let manager = ConnectionManager::new(transport.clone(), Duration::from_secs(5));
/// manager.connect(None).await?;
///
/// transport.emit("appointment.updated", json!({"id": 1, "status": "Confirmed"}));
/// ```
pub struct InMemoryPushTransport {
    state: Mutex<TransportState>,
    rooms: Arc<Mutex<Vec<TenantId>>>,
}

impl InMemoryPushTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TransportState::default()),
            rooms: Arc::new(Mutex::new(Vec::new())),
        }
    }

    // === Test Controls ===

    /// Makes the next `count` opens fail with `ConnectFailed`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn fail_next_opens(&self, count: usize) {
        self.lock().fail_next_opens = count;
    }

    /// Delays every open by `delay` before it resolves.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn set_open_delay(&self, delay: Duration) {
        self.lock().open_delay = Some(delay);
    }

    /// Delivers a message on `topic` to every open connection.
    ///
    /// Returns how many connections received it.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn emit(&self, topic: &str, payload: JsonValue) -> usize {
        let open = self.open_connections();
        for connection in &open {
            connection.sink.deliver(topic, payload.clone());
        }
        open.len()
    }

    /// Reports a non-fatal error on every open connection.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn emit_error(&self, error: TransportError) {
        for connection in self.open_connections() {
            connection.sink.transport_error(error.clone());
        }
    }

    /// Simulates the server closing every open connection.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn drop_connection(&self) {
        for connection in self.open_connections() {
            connection.open.store(false, Ordering::SeqCst);
            connection.sink.closed();
        }
    }

    // === Test Helpers ===

    /// Number of opens that produced a connection.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    /// Connections that are still open.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn live_connection_count(&self) -> usize {
        self.open_connections().len()
    }

    /// Every room join sent, in order, across all connections.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn joined_rooms(&self) -> Vec<TenantId> {
        self.rooms
            .lock()
            .expect("InMemoryPushTransport: rooms lock poisoned")
            .clone()
    }

    /// Auth tokens presented to each successful open, exposed for assertions.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn auth_tokens(&self) -> Vec<Option<String>> {
        self.lock().auth_tokens.clone()
    }

    fn open_connections(&self) -> Vec<Arc<InMemoryConnection>> {
        self.lock()
            .connections
            .iter()
            .filter(|c| c.is_open())
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state
            .lock()
            .expect("InMemoryPushTransport: state lock poisoned")
    }
}

impl Default for InMemoryPushTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushTransport for InMemoryPushTransport {
    async fn open(
        &self,
        auth_token: Option<&SecretString>,
        inbound: Arc<dyn InboundSink>,
    ) -> Result<Arc<dyn PushConnection>, TransportError> {
        let delay = self.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.fail_next_opens > 0 {
            state.fail_next_opens -= 1;
            return Err(TransportError::ConnectFailed("simulated open failure".to_string()));
        }

        let connection = Arc::new(InMemoryConnection {
            id: ConnectionId::new(),
            open: AtomicBool::new(true),
            sink: inbound,
            rooms: Arc::clone(&self.rooms),
        });
        state.open_count += 1;
        state
            .auth_tokens
            .push(auth_token.map(|token| token.expose_secret().clone()));
        state.connections.push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// One connection opened by [`InMemoryPushTransport`].
pub struct InMemoryConnection {
    id: ConnectionId,
    open: AtomicBool,
    sink: Arc<dyn InboundSink>,
    rooms: Arc<Mutex<Vec<TenantId>>>,
}

#[async_trait]
impl PushConnection for InMemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn join_room(&self, tenant: &TenantId) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        self.rooms
            .lock()
            .expect("InMemoryConnection: rooms lock poisoned")
            .push(tenant.clone());
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(String, JsonValue)>>,
        closed: AtomicBool,
    }

    impl InboundSink for RecordingSink {
        fn deliver(&self, topic: &str, payload: JsonValue) {
            self.delivered.lock().unwrap().push((topic.to_string(), payload));
        }

        fn transport_error(&self, _error: TransportError) {}

        fn closed(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn emit_reaches_open_connections_only() {
        let transport = InMemoryPushTransport::new();
        let sink = Arc::new(RecordingSink::default());
        let connection = transport.open(None, sink.clone()).await.unwrap();

        assert_eq!(transport.emit("patient.created", json!({"id": 3})), 1);
        connection.close().await;
        assert_eq!(transport.emit("patient.created", json!({"id": 4})), 0);

        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "patient.created");
    }

    #[tokio::test]
    async fn drop_connection_notifies_sink() {
        let transport = InMemoryPushTransport::new();
        let sink = Arc::new(RecordingSink::default());
        let connection = transport.open(None, sink.clone()).await.unwrap();

        transport.drop_connection();

        assert!(!connection.is_open());
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn records_auth_token() {
        let transport = InMemoryPushTransport::new();
        let token = SecretString::new("bearer-abc".to_string());

        transport
            .open(Some(&token), Arc::new(RecordingSink::default()))
            .await
            .unwrap();

        assert_eq!(transport.auth_tokens(), vec![Some("bearer-abc".to_string())]);
    }

    #[tokio::test]
    async fn closed_connection_cannot_join() {
        let transport = InMemoryPushTransport::new();
        let connection = transport
            .open(None, Arc::new(RecordingSink::default()))
            .await
            .unwrap();
        connection.close().await;

        let tenant = TenantId::new("doctor-1").unwrap();
        assert_eq!(connection.join_room(&tenant).await, Err(TransportError::NotConnected));
    }
}
