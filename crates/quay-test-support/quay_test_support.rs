//! Quay test support
//!
//! Shared infrastructure for exercising the lifecycle manager without real
//! backends:
//!
//! - `MockDriver` / `MockConnection` - a driver registered for every connection
//!   type, with a configurable construction delay, failure injection and
//!   construction counters
//! - `TestServer` / `PackageFixture` - project and package trees on a temp dir
//!
//! # Usage
//!
//! ```rust,ignore
//! let driver = MockDriver::new().with_delay(Duration::from_millis(200));
//! let mut registry = DriverRegistry::new();
//! registry.register(driver.clone());
//!
//! let server = TestServer::new()?;
//! server.write_package("P", "Q", &PackageFixture::new().model("m.malloy", SOURCE))?;
//! ```

pub mod fixtures;
pub mod mock;

pub use fixtures::{PackageFixture, TestServer};
pub use mock::{MockConnection, MockDriver};

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
