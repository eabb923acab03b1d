//! Driver registry keyed by connection type

use quay_core::{ConnectionType, DatabaseDriver};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available backend drivers
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: HashMap<ConnectionType, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "duckdb")]
        registry.register(Arc::new(crate::duckdb::DuckDbDriver::new()));
        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::postgres::PostgresDriver::new()));
        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::mysql::MySqlDriver::new()));
        #[cfg(feature = "trino")]
        registry.register(Arc::new(crate::trino::TrinoDriver::new()));

        registry
    }

    /// Register a driver for every connection type it constructs. A later
    /// registration for the same type replaces the earlier one.
    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        for connection_type in driver.connection_types() {
            tracing::info!(
                connection_type = %connection_type,
                driver = driver.display_name(),
                "registering database driver"
            );
            self.drivers.insert(*connection_type, driver.clone());
        }
    }

    /// Get the driver for a connection type
    pub fn get(&self, connection_type: ConnectionType) -> Option<Arc<dyn DatabaseDriver>> {
        let driver = self.drivers.get(&connection_type).cloned();
        if driver.is_none() {
            tracing::warn!(connection_type = %connection_type, "driver not found in registry");
        }
        driver
    }

    /// List all connection types with a registered driver
    pub fn list(&self) -> Vec<ConnectionType> {
        let mut types: Vec<_> = self.drivers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Check if a driver is registered for a connection type
    pub fn has(&self, connection_type: ConnectionType) -> bool {
        self.drivers.contains_key(&connection_type)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("types", &self.list())
            .finish()
    }
}
