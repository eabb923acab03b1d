//! Api-facing connection descriptors and their validation

use crate::{QuayError, Result};
use serde::{Deserialize, Serialize};

/// Name of the embedded analytical connection every package receives
pub const DEFAULT_CONNECTION_NAME: &str = "duckdb";

/// Backend type of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Postgres,
    Bigquery,
    Snowflake,
    Trino,
    Mysql,
    Duckdb,
    Motherduck,
}

impl ConnectionType {
    pub const ALL: [ConnectionType; 7] = [
        ConnectionType::Postgres,
        ConnectionType::Bigquery,
        ConnectionType::Snowflake,
        ConnectionType::Trino,
        ConnectionType::Mysql,
        ConnectionType::Duckdb,
        ConnectionType::Motherduck,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Postgres => "postgres",
            ConnectionType::Bigquery => "bigquery",
            ConnectionType::Snowflake => "snowflake",
            ConnectionType::Trino => "trino",
            ConnectionType::Mysql => "mysql",
            ConnectionType::Duckdb => "duckdb",
            ConnectionType::Motherduck => "motherduck",
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived attributes reported with every sanitized descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAttributes {
    pub dialect_name: String,
    pub is_pool: bool,
    pub can_persist: bool,
    pub can_stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostgresConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MysqlConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BigqueryConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_key_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_bytes_billed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_milliseconds: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnowflakeConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_timeout_milliseconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrinoConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotherduckConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Connection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

/// Kind of secondary source attached into an embedded engine session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachedDatabaseType {
    Bigquery,
    Snowflake,
    Postgres,
    Motherduck,
    Gcs,
    S3,
}

/// A secondary database made queryable from an embedded engine session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDatabase {
    pub name: String,
    #[serde(rename = "type")]
    pub database_type: AttachedDatabaseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bigquery_connection: Option<BigqueryConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snowflake_connection: Option<SnowflakeConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres_connection: Option<PostgresConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motherduck_connection: Option<MotherduckConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs_connection: Option<GcsConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_connection: Option<S3Connection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuckdbConnection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attached_databases: Vec<AttachedDatabase>,
}

/// A configured connection as it appears in config files and the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ConnectionAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres_connection: Option<PostgresConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql_connection: Option<MysqlConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bigquery_connection: Option<BigqueryConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snowflake_connection: Option<SnowflakeConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trino_connection: Option<TrinoConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duckdb_connection: Option<DuckdbConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motherduck_connection: Option<MotherduckConnection>,
}

fn missing(config: &ConnectionConfig, field: &str) -> QuayError {
    QuayError::Configuration(format!(
        "{} connection \"{}\" is missing required field {}",
        config.connection_type, config.name, field
    ))
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl ConnectionConfig {
    /// Create a bare configuration of the given type
    pub fn new(name: impl Into<String>, connection_type: ConnectionType) -> Self {
        Self {
            name: name.into(),
            connection_type,
            resource: None,
            attributes: None,
            postgres_connection: None,
            mysql_connection: None,
            bigquery_connection: None,
            snowflake_connection: None,
            trino_connection: None,
            duckdb_connection: None,
            motherduck_connection: None,
        }
    }

    /// The embedded analytical connection a package gets by default
    pub fn default_duckdb() -> Self {
        Self::new(DEFAULT_CONNECTION_NAME, ConnectionType::Duckdb)
    }

    /// Check the fields required by `connection_type`. The error names the
    /// first missing field.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(QuayError::Configuration(
                "connection name must not be empty".into(),
            ));
        }

        match self.connection_type {
            ConnectionType::Postgres => {
                let pg = self
                    .postgres_connection
                    .as_ref()
                    .ok_or_else(|| missing(self, "postgresConnection"))?;
                if !present(&pg.connection_string) && !present(&pg.host) {
                    return Err(missing(self, "postgresConnection.host"));
                }
            }
            ConnectionType::Mysql => {
                let mysql = self
                    .mysql_connection
                    .as_ref()
                    .ok_or_else(|| missing(self, "mysqlConnection"))?;
                if !present(&mysql.host) {
                    return Err(missing(self, "mysqlConnection.host"));
                }
                if !present(&mysql.user) {
                    return Err(missing(self, "mysqlConnection.user"));
                }
            }
            ConnectionType::Bigquery => {
                let bq = self
                    .bigquery_connection
                    .as_ref()
                    .ok_or_else(|| missing(self, "bigqueryConnection"))?;
                if !present(&bq.default_project_id) && !present(&bq.service_account_key_json) {
                    return Err(missing(self, "bigqueryConnection.defaultProjectId"));
                }
            }
            ConnectionType::Snowflake => {
                let sf = self
                    .snowflake_connection
                    .as_ref()
                    .ok_or_else(|| missing(self, "snowflakeConnection"))?;
                if !present(&sf.account) {
                    return Err(missing(self, "snowflakeConnection.account"));
                }
                if !present(&sf.username) {
                    return Err(missing(self, "snowflakeConnection.username"));
                }
                if !present(&sf.password) && !present(&sf.private_key) {
                    return Err(missing(self, "snowflakeConnection.password"));
                }
            }
            ConnectionType::Trino => {
                let trino = self
                    .trino_connection
                    .as_ref()
                    .ok_or_else(|| missing(self, "trinoConnection"))?;
                if !present(&trino.server) {
                    return Err(missing(self, "trinoConnection.server"));
                }
                if !present(&trino.user) {
                    return Err(missing(self, "trinoConnection.user"));
                }
            }
            ConnectionType::Motherduck => {
                let md = self
                    .motherduck_connection
                    .as_ref()
                    .ok_or_else(|| missing(self, "motherduckConnection"))?;
                if !present(&md.access_token) {
                    return Err(missing(self, "motherduckConnection.accessToken"));
                }
            }
            ConnectionType::Duckdb => {
                if let Some(duckdb) = &self.duckdb_connection {
                    for attached in &duckdb.attached_databases {
                        if attached.name.trim().is_empty() {
                            return Err(missing(self, "attachedDatabases[].name"));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Copy safe to hand out through the API: secrets removed, attributes set
    pub fn sanitized(&self, attributes: ConnectionAttributes) -> Self {
        let mut copy = self.clone();
        copy.attributes = Some(attributes);
        if let Some(pg) = copy.postgres_connection.as_mut() {
            pg.password = None;
            pg.connection_string = None;
        }
        if let Some(mysql) = copy.mysql_connection.as_mut() {
            mysql.password = None;
        }
        if let Some(bq) = copy.bigquery_connection.as_mut() {
            bq.service_account_key_json = None;
        }
        if let Some(sf) = copy.snowflake_connection.as_mut() {
            sf.password = None;
            sf.private_key = None;
        }
        if let Some(trino) = copy.trino_connection.as_mut() {
            trino.password = None;
        }
        if let Some(md) = copy.motherduck_connection.as_mut() {
            md.access_token = None;
        }
        if let Some(duckdb) = copy.duckdb_connection.as_mut() {
            for attached in &mut duckdb.attached_databases {
                attached.strip_secrets();
            }
        }
        copy
    }
}

impl AttachedDatabase {
    fn strip_secrets(&mut self) {
        if let Some(bq) = self.bigquery_connection.as_mut() {
            bq.service_account_key_json = None;
        }
        if let Some(sf) = self.snowflake_connection.as_mut() {
            sf.password = None;
            sf.private_key = None;
        }
        if let Some(pg) = self.postgres_connection.as_mut() {
            pg.password = None;
            pg.connection_string = None;
        }
        if let Some(md) = self.motherduck_connection.as_mut() {
            md.access_token = None;
        }
        if let Some(gcs) = self.gcs_connection.as_mut() {
            gcs.secret = None;
        }
        if let Some(s3) = self.s3_connection.as_mut() {
            s3.secret_access_key = None;
            s3.session_token = None;
        }
    }
}
