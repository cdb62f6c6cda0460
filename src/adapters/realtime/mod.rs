//! Push channel plumbing: the shared connection and its handler registry.

mod connection_manager;
mod in_memory;
mod subscriptions;

pub use connection_manager::{ConnectionHandle, ConnectionManager, ConnectionStatus};
pub use in_memory::{InMemoryConnection, InMemoryPushTransport};
pub use subscriptions::{Disposer, PushHandler, SubscriptionRegistry};
