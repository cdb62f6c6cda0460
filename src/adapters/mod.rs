//! Adapters - Implementations of port interfaces and shared plumbing.
//!
//! - `realtime` - Connection manager, subscription registry, in-memory push transport
//! - `fetch` - In-memory REST collaborator

pub mod fetch;
pub mod realtime;
