//! PostgreSQL driver for quay

mod connection;
mod driver;
#[cfg(test)]
mod driver_tests;

pub use connection::PostgresConnection;
pub use driver::*;
