//! PushTransport port - Interface to the persistent multiplexed push channel.
//!
//! The transport owns wire encoding and the physical socket. The core only
//! sees named topics carrying JSON payloads, a room-join primitive, and
//! lifecycle signals.
//!
//! ## Flow
//!
//! 1. `ConnectionManager` calls [`PushTransport::open`], handing over an
//!    [`InboundSink`]
//! 2. The transport calls [`InboundSink::deliver`] for every push message
//! 3. Errors and remote closes are reported through the same sink

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value as JsonValue;

use crate::domain::foundation::{ConnectionId, TenantId};

/// Errors raised by the push channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport could not be established
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// An established connection went away
    #[error("Connection dropped: {0}")]
    Dropped(String),

    /// An operation needed a live connection and there was none
    #[error("Not connected")]
    NotConnected,

    /// Connect did not finish within the configured timeout
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// An outbound frame (e.g. room join) could not be sent
    #[error("Send failed: {0}")]
    Send(String),
}

/// Receives everything the transport pushes toward the client.
///
/// Implementations must not block; they run on the transport's delivery
/// context.
pub trait InboundSink: Send + Sync {
    /// A push message arrived on `topic`.
    fn deliver(&self, topic: &str, payload: JsonValue);

    /// The connection reported a non-fatal error.
    fn transport_error(&self, error: TransportError);

    /// The remote side closed the connection.
    fn closed(&self);
}

/// Port for opening push-channel connections.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a new physical connection.
    ///
    /// Every call builds a fresh connection; reuse is the caller's concern.
    async fn open(
        &self,
        auth_token: Option<&SecretString>,
        inbound: Arc<dyn InboundSink>,
    ) -> Result<Arc<dyn PushConnection>, TransportError>;
}

/// One live push-channel connection.
#[async_trait]
pub trait PushConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// False once closed locally or dropped remotely.
    fn is_open(&self) -> bool;

    /// Ask the server to scope push events to `tenant`.
    ///
    /// Repeated joins are allowed; the server tolerates them.
    async fn join_room(&self, tenant: &TenantId) -> Result<(), TransportError>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);
}
