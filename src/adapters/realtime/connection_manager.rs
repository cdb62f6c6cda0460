//! Owned, reference-counted push connection.
//!
//! One [`ConnectionManager`] is shared by every surface that needs push
//! events. Each successful [`ConnectionManager::connect`] hands out a lease;
//! the transport is torn down only when the last lease is released, so one
//! surface closing cannot sever another surface's channel.
//!
//! Every physical connection gets a generation number. Messages from a
//! connection that has since been replaced are dropped by its sink, so a
//! half-closed transport can never feed the cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use secrecy::SecretString;
use serde_json::Value as JsonValue;
use tokio::sync::{watch, Mutex};

use crate::domain::cache::Topic;
use crate::domain::foundation::{ConnectionId, TenantId};
use crate::ports::{InboundSink, PushConnection, PushTransport, TransportError};

use super::subscriptions::{Disposer, PushHandler, SubscriptionRegistry};

/// Observable state of the shared connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// The last connect or the live connection failed; cached data is stale.
    Failed(String),
}

impl ConnectionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// A lease on the shared connection.
///
/// Return it through [`ConnectionManager::disconnect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    generation: u64,
    connection_id: ConnectionId,
}

impl ConnectionHandle {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct LiveConnection {
    connection: Arc<dyn PushConnection>,
    generation: u64,
    leases: usize,
}

/// Owns the single push connection and its handler registry.
pub struct ConnectionManager {
    transport: Arc<dyn PushTransport>,
    registry: Arc<SubscriptionRegistry>,
    lifecycle: Mutex<Option<LiveConnection>>,
    /// Generation of the connection allowed to deliver; 0 when none.
    live_generation: Arc<AtomicU64>,
    next_generation: AtomicU64,
    status: Arc<watch::Sender<ConnectionStatus>>,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn PushTransport>, connect_timeout: Duration) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            transport,
            registry: Arc::new(SubscriptionRegistry::new()),
            lifecycle: Mutex::new(None),
            live_generation: Arc::new(AtomicU64::new(0)),
            next_generation: AtomicU64::new(1),
            status: Arc::new(status),
            connect_timeout,
        }
    }

    /// Acquire a lease on the shared connection, opening it if needed.
    ///
    /// Reuses a live connection, reporting it `Connected` again if a
    /// non-fatal transport error had marked it failed. A connection that
    /// closed or dropped underneath is torn down and replaced by a fresh one.
    /// Concurrent callers are serialized and share one connection.
    pub async fn connect(&self, auth_token: Option<&SecretString>) -> Result<ConnectionHandle, TransportError> {
        let mut lifecycle = self.lifecycle.lock().await;

        if let Some(live) = lifecycle.as_mut() {
            if live.connection.is_open() {
                live.leases += 1;
                tracing::debug!(
                    connection_id = %live.connection.id(),
                    leases = live.leases,
                    "Reusing live connection"
                );
                mark_connected(&self.status);
                return Ok(ConnectionHandle {
                    generation: live.generation,
                    connection_id: live.connection.id(),
                });
            }
        }
        if let Some(stale) = lifecycle.take() {
            tracing::info!(
                connection_id = %stale.connection.id(),
                "Replacing half-closed connection"
            );
            self.teardown(stale).await;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.live_generation.store(generation, Ordering::SeqCst);
        self.status.send_replace(ConnectionStatus::Connecting);

        let sink = Arc::new(ConnectionSink {
            registry: Arc::downgrade(&self.registry),
            generation,
            live_generation: Arc::clone(&self.live_generation),
            status: Arc::clone(&self.status),
        });
        let opened = tokio::time::timeout(self.connect_timeout, self.transport.open(auth_token, sink)).await;
        let connection = match opened {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => return Err(self.connect_failed(err)),
            Err(_) => return Err(self.connect_failed(TransportError::Timeout(self.connect_timeout))),
        };

        let handle = ConnectionHandle {
            generation,
            connection_id: connection.id(),
        };
        tracing::info!(connection_id = %handle.connection_id, generation, "Push connection established");
        *lifecycle = Some(LiveConnection {
            connection,
            generation,
            leases: 1,
        });
        self.status.send_replace(ConnectionStatus::Connected);
        Ok(handle)
    }

    /// Ask the server to scope push events to `tenant`.
    ///
    /// Not deduplicated; every call sends a join.
    pub async fn join_room(&self, tenant: &TenantId) -> Result<(), TransportError> {
        let connection = {
            let lifecycle = self.lifecycle.lock().await;
            match lifecycle.as_ref() {
                Some(live) if live.connection.is_open() => Arc::clone(&live.connection),
                _ => return Err(TransportError::NotConnected),
            }
        };
        connection.join_room(tenant).await?;
        tracing::debug!(tenant = %tenant, connection_id = %connection.id(), "Joined tenant room");
        Ok(())
    }

    /// Register `handler` for `topic` on the current connection.
    ///
    /// Without a connection, or after the remote closed it, this registers
    /// nothing and returns an inert disposer.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn PushHandler>) -> Disposer {
        if self.live_generation.load(Ordering::SeqCst) == 0 {
            tracing::debug!(%topic, "Subscribe without a connection ignored");
            return Disposer::noop();
        }
        self.registry.subscribe(topic, handler)
    }

    /// Release a lease. Returns true when this tore the transport down.
    ///
    /// Handles from an earlier connection generation are ignored.
    pub async fn disconnect(&self, handle: &ConnectionHandle) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(live) = lifecycle.as_mut() else {
            return false;
        };
        if live.generation != handle.generation {
            tracing::debug!(
                generation = handle.generation,
                current = live.generation,
                "Ignoring release of superseded connection lease"
            );
            return false;
        }
        live.leases = live.leases.saturating_sub(1);
        if live.leases > 0 {
            tracing::debug!(leases = live.leases, "Connection lease released");
            return false;
        }
        if let Some(last) = lifecycle.take() {
            self.teardown(last).await;
        }
        true
    }

    /// Tear the connection down regardless of outstanding leases.
    pub async fn force_disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(live) = lifecycle.take() {
            tracing::info!(leases = live.leases, "Forcing connection teardown");
            self.teardown(live).await;
        }
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current_status().is_live()
    }

    pub async fn lease_count(&self) -> usize {
        self.lifecycle.lock().await.as_ref().map(|live| live.leases).unwrap_or(0)
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    fn connect_failed(&self, err: TransportError) -> TransportError {
        self.live_generation.store(0, Ordering::SeqCst);
        self.registry.clear();
        tracing::warn!(error = %err, "Push connection failed");
        self.status.send_replace(ConnectionStatus::Failed(err.to_string()));
        err
    }

    async fn teardown(&self, live: LiveConnection) {
        self.live_generation.store(0, Ordering::SeqCst);
        let dropped = self.registry.clear();
        if dropped > 0 {
            tracing::info!(
                handlers = dropped,
                "Dropped push handlers with connection; subscribers must re-subscribe"
            );
        }
        live.connection.close().await;
        tracing::info!(
            connection_id = %live.connection.id(),
            generation = live.generation,
            "Push connection closed"
        );
        self.status.send_replace(ConnectionStatus::Disconnected);
    }
}

/// Routes one connection's inbound traffic into the registry.
struct ConnectionSink {
    registry: Weak<SubscriptionRegistry>,
    generation: u64,
    live_generation: Arc<AtomicU64>,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl ConnectionSink {
    fn is_current(&self) -> bool {
        self.live_generation.load(Ordering::SeqCst) == self.generation
    }
}

impl InboundSink for ConnectionSink {
    fn deliver(&self, topic: &str, payload: JsonValue) {
        if !self.is_current() {
            tracing::debug!(topic, generation = self.generation, "Dropping message from superseded connection");
            return;
        }
        if mark_connected(&self.status) {
            tracing::info!(generation = self.generation, "Push connection recovered");
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.dispatch(topic, &payload);
        }
    }

    fn transport_error(&self, error: TransportError) {
        if !self.is_current() {
            return;
        }
        tracing::warn!(error = %error, generation = self.generation, "Push transport error");
        self.status.send_replace(ConnectionStatus::Failed(error.to_string()));
    }

    fn closed(&self) {
        if !self.is_current() {
            return;
        }
        tracing::info!(generation = self.generation, "Push connection closed by remote");
        // Later subscribes must not attach to the dead connection.
        let _ = self.live_generation.compare_exchange(
            self.generation,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.status.send_replace(ConnectionStatus::Disconnected);
    }
}

/// Clears a `Failed` status on a connection that is still delivering.
/// Returns true when the status changed.
fn mark_connected(status: &watch::Sender<ConnectionStatus>) -> bool {
    status.send_if_modified(|current| {
        if matches!(current, ConnectionStatus::Failed(_)) {
            *current = ConnectionStatus::Connected;
            true
        } else {
            false
        }
    })
}
