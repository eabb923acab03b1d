//! Quay Core - Core abstractions shared by every quay crate
//!
//! This crate defines the vocabulary the lifecycle manager is built on:
//!
//! - `Connection` - Uniform capability surface of a live backend connection
//! - `DatabaseDriver` - Constructs connections for one connection type
//! - `ConnectionConfig` - Api-facing connection descriptor with per-type credentials
//! - `QuayError` - Error taxonomy surfaced at the API boundary
//! - Common types like `Value`, `Row`, `QueryResult`, `TableSchema`

mod config;
mod connection;
mod driver;
mod error;
pub mod sql;
mod types;

pub use config::*;
pub use connection::*;
pub use driver::*;
pub use error::*;
pub use types::*;
