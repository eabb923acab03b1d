//! Trino driver for quay
//!
//! Talks to the coordinator over the client REST protocol: a statement is
//! POSTed to `/v1/statement` and result pages are fetched by following
//! `nextUri` until the query finishes.

mod driver;
#[cfg(test)]
mod driver_tests;
mod protocol;

pub use driver::*;
pub use protocol::{QueryPage, StatementResults, TrinoColumn, TrinoError};
