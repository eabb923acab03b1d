//! Database driver trait definition

use crate::{Connection, ConnectionConfig, ConnectionType, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Static capabilities a driver advertises for its connections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// Connections hand out pooled sessions
    pub supports_pooling: bool,
    /// Query results can be persisted as tables
    pub supports_persistence: bool,
    /// Rows can be streamed
    pub supports_streaming: bool,
    /// Secondary databases can be attached into one session
    pub supports_attachments: bool,
}

/// Core driver trait that all backend drivers must implement.
///
/// A driver is selected once per connection config, by `ConnectionType`;
/// calls on the resulting connection never re-dispatch on the type.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Connection types this driver constructs
    fn connection_types(&self) -> &'static [ConnectionType];

    /// Human-readable name (e.g. "PostgreSQL", "DuckDB")
    fn display_name(&self) -> &'static str;

    /// Supported features/capabilities
    fn capabilities(&self) -> DriverCapabilities;

    /// Create a new connection. `working_directory` anchors relative paths
    /// (package directory for package connections, project directory otherwise).
    async fn connect(
        &self,
        config: &ConnectionConfig,
        working_directory: &Path,
    ) -> Result<Arc<dyn Connection>>;

    /// Construct a throwaway connection, run its `test()` and close it
    async fn test_connection(
        &self,
        config: &ConnectionConfig,
        working_directory: &Path,
    ) -> Result<()> {
        let conn = self.connect(config, working_directory).await?;
        let outcome = conn.test().await;
        if let Err(e) = conn.close().await {
            tracing::warn!(connection = %config.name, error = %e, "failed to close test connection");
        }
        outcome
    }
}
