//! Ports - Interfaces for external collaborators.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the cache core and the outside world. Adapters implement these ports.
//!
//! - `PushTransport` / `PushConnection` - Persistent multiplexed push channel
//! - `InboundSink` - Where a connection delivers push messages
//! - `EntityFetcher` - On-demand REST fetches and mutations

mod entity_fetcher;
mod push_transport;

pub use entity_fetcher::{EntityFetcher, FetchError};
pub use push_transport::{InboundSink, PushConnection, PushTransport, TransportError};
