//! MySQL driver for quay

mod connection;
mod driver;
#[cfg(test)]
mod driver_tests;

pub use connection::MySqlConnection;
pub use driver::*;
