//! DuckDB driver for quay
//!
//! DuckDB is the embedded analytical engine every package gets by default.
//! Sessions open in memory with the working directory as file search path,
//! so models can read Parquet/CSV files relative to their package. The same
//! driver serves MotherDuck connections and attaches secondary databases
//! (warehouses, object stores) into a session.

mod attach;
mod driver;
#[cfg(test)]
mod driver_tests;

pub use attach::attach_statements;
pub use driver::*;
