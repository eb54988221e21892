//! histrail-core library.
//!
//! Audit-trail engine for host persistence layers: snapshots tracked
//! entities on every lifecycle event, diffs them against the previous
//! snapshot, appends [`model::HistoricalRecord`]s to a SQLite store and
//! propagates one-hop records to related tracked entities.
//!
//! A host wires it up once at bootstrap:
//!
//! 1. declare tracked types on a [`registry::RegistryBuilder`] and `build`
//!    it against the host's [`source::EntitySource`],
//! 2. subscribe a [`controller::HistoryLogger`] to the host's lifecycle
//!    hooks ([`hooks::LifecycleListener`]),
//! 3. pass the caller's connection or transaction into every hook.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums at API seams ([`error`]), `anyhow::Result`
//!   with context on store and orchestration paths.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`).

pub mod config;
pub mod controller;
pub mod db;
pub mod diff;
pub mod error;
pub mod hooks;
pub mod memory;
pub mod model;
pub mod populate;
pub mod propagate;
pub mod registry;
pub mod snapshot;
pub mod source;

pub use controller::HistoryLogger;
pub use registry::{Registry, RegistryBuilder, TrackingConfig};
