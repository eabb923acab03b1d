//! Mock driver and connection

use async_trait::async_trait;
use parking_lot::Mutex;
use quay_core::{
    ColumnMeta, Connection, ConnectionConfig, ConnectionType, DatabaseDriver, DriverCapabilities,
    QuayError, QueryResult, Result, Row, RunSqlOptions, TableSchema, Value,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Driver that constructs `MockConnection`s for every connection type
#[derive(Default)]
pub struct MockDriver {
    delay: Mutex<Duration>,
    delays: Mutex<HashMap<String, Duration>>,
    close_delays: Mutex<HashMap<String, Duration>>,
    failure: Mutex<Option<String>>,
    failing: Mutex<HashMap<String, String>>,
    failing_tests: AtomicBool,
    failing_probes: AtomicBool,
    connects: AtomicUsize,
    connects_by_name: Mutex<HashMap<String, usize>>,
    created: Mutex<Vec<Arc<MockConnection>>>,
    tables: Mutex<HashMap<String, TableSchema>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay applied to every construction
    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock() = delay;
        self
    }

    /// Delay applied to constructions of one connection name
    pub fn with_delay_for(self: Arc<Self>, name: &str, delay: Duration) -> Arc<Self> {
        self.delays.lock().insert(name.to_string(), delay);
        self
    }

    /// Delay applied when connections of one name are closed
    pub fn with_close_delay_for(self: Arc<Self>, name: &str, delay: Duration) -> Arc<Self> {
        self.close_delays.lock().insert(name.to_string(), delay);
        self
    }

    /// Make every construction fail with `message` (None clears it)
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(String::from);
    }

    /// Make constructions of one connection name fail
    pub fn fail_for(&self, name: &str, message: &str) {
        self.failing
            .lock()
            .insert(name.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.set_failure(None);
        self.failing.lock().clear();
    }

    /// Make `Connection::test` fail on connections built from now on
    pub fn fail_tests(&self, fail: bool) {
        self.failing_tests.store(fail, Ordering::SeqCst);
    }

    /// Make the capability probes return errors
    pub fn fail_probes(&self, fail: bool) {
        self.failing_probes.store(fail, Ordering::SeqCst);
    }

    /// Register a table for `fetch_table_schema`, keyed by path
    pub fn add_table(&self, path: &str, columns: &[(&str, &str)]) {
        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| ColumnMeta::new(*name, *ty, i))
            .collect();
        self.tables.lock().insert(
            path.to_string(),
            TableSchema {
                name: path.to_string(),
                path: Some(path.to_string()),
                columns,
                row_count: None,
            },
        );
    }

    /// Total constructions attempted (including failed ones)
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Constructions attempted for one connection name
    pub fn connect_count_for(&self, name: &str) -> usize {
        self.connects_by_name.lock().get(name).copied().unwrap_or(0)
    }

    /// Every connection successfully constructed so far
    pub fn created(&self) -> Vec<Arc<MockConnection>> {
        self.created.lock().clone()
    }

    /// Connections named `name` constructed so far
    pub fn created_named(&self, name: &str) -> Vec<Arc<MockConnection>> {
        self.created
            .lock()
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }

    /// Every statement run through any connection of this driver
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    fn connection_types(&self) -> &'static [ConnectionType] {
        &ConnectionType::ALL
    }

    fn display_name(&self) -> &'static str {
        "Mock"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::default()
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        _working_directory: &Path,
    ) -> Result<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self
            .connects_by_name
            .lock()
            .entry(config.name.clone())
            .or_default() += 1;

        let delay = self
            .delays
            .lock()
            .get(&config.name)
            .copied()
            .unwrap_or(*self.delay.lock());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failing
            .lock()
            .get(&config.name)
            .cloned()
            .or_else(|| self.failure.lock().clone());
        if let Some(message) = failure {
            return Err(QuayError::Connection(message));
        }

        let connection = Arc::new(MockConnection {
            name: config.name.clone(),
            connection_type: config.connection_type,
            closed: AtomicBool::new(false),
            close_delay: self
                .close_delays
                .lock()
                .get(&config.name)
                .copied()
                .unwrap_or_default(),
            fail_test: self.failing_tests.load(Ordering::SeqCst),
            fail_probes: self.failing_probes.load(Ordering::SeqCst),
            tables: self.tables.lock().clone(),
            executed: self.executed.clone(),
        });
        self.created.lock().push(connection.clone());
        Ok(connection)
    }
}

/// Connection that records statements and answers from fixtures
pub struct MockConnection {
    name: String,
    connection_type: ConnectionType,
    closed: AtomicBool,
    close_delay: Duration,
    fail_test: bool,
    fail_probes: bool,
    tables: HashMap<String, TableSchema>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockConnection {
    pub fn connection_name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Answers with one row holding the statement text in column `sql`
    async fn run_sql(&self, sql: &str, _options: &RunSqlOptions) -> Result<QueryResult> {
        if self.is_closed() {
            return Err(QuayError::Connection("Connection is closed".into()));
        }
        self.executed.lock().push(sql.to_string());
        Ok(QueryResult::new(
            vec![ColumnMeta::new("sql", "VARCHAR", 0)],
            vec![Row::new(vec!["sql".into()], vec![Value::String(sql.into())])],
        ))
    }

    async fn fetch_table_schema(&self, key: &str, path: &str) -> Result<Option<TableSchema>> {
        Ok(self.tables.get(path).cloned().map(|mut schema| {
            schema.name = key.to_string();
            schema
        }))
    }

    async fn test(&self) -> Result<()> {
        if self.fail_test {
            return Err(QuayError::Connection("mock test failure".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_pool(&self) -> Result<bool> {
        if self.fail_probes {
            return Err(QuayError::Internal("probe failed".into()));
        }
        Ok(true)
    }

    fn can_persist(&self) -> Result<bool> {
        if self.fail_probes {
            return Err(QuayError::Internal("probe failed".into()));
        }
        Ok(true)
    }
}
