//! REST collaborator adapters.

mod in_memory;

pub use in_memory::{FetchGate, InMemoryFetcher};
