//! Domain layer containing the cache logic and its vocabulary.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (identifiers, timestamps, errors, state machine)
//! - `cache` - Entity collections, identity normalization, merge rules and load guard

pub mod cache;
pub mod foundation;
