//! Clinic Sync - Real-time entity cache for the clinic management client.
//!
//! Keeps per-kind collections of patients, appointments, dashboard rows and
//! login activity consistent across REST snapshots, push events and
//! optimistic local edits.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
