//! Quay Drivers - Backend driver registry and connection factory
//!
//! Concrete drivers live in their own crates and are pulled in by feature.
//! `DriverRegistry` selects one driver per `ConnectionType`;
//! `ConnectionFactory` turns connection descriptors into live connections.

#[cfg(feature = "duckdb")]
pub use quay_driver_duckdb as duckdb;
#[cfg(feature = "mysql")]
pub use quay_driver_mysql as mysql;
#[cfg(feature = "postgres")]
pub use quay_driver_postgres as postgres;
#[cfg(feature = "trino")]
pub use quay_driver_trino as trino;

mod factory;
mod registry;

pub use factory::{ConnectionFactory, ConnectionSet, ConnectionStatus, ConnectionTestStatus, DEFAULT_PROBE_TIMEOUT};
pub use registry::DriverRegistry;

/// Re-export commonly used types from quay-core
pub use quay_core::{
    Connection, ConnectionConfig, ConnectionType, DatabaseDriver, DriverCapabilities, QuayError,
    QueryResult, Result,
};
