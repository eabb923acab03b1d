//! Statements that attach secondary databases into a DuckDB session

use quay_core::sql::{escape_sql_string, quote_identifier};
use quay_core::{AttachedDatabase, AttachedDatabaseType, PostgresConnection, QuayError, Result};

fn missing(attached: &AttachedDatabase, field: &str) -> QuayError {
    QuayError::Configuration(format!(
        "attached database \"{}\" is missing required field {}",
        attached.name, field
    ))
}

fn secret_name(attached: &AttachedDatabase) -> String {
    let base: String = attached
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_secret", base)
}

/// Render a single-quoted SQL option, e.g. `KEY_ID 'abc'`
fn option(key: &str, value: &str) -> String {
    format!("{} '{}'", key, escape_sql_string(value))
}

fn postgres_target(pg: &PostgresConnection) -> String {
    if let Some(connection_string) = pg.connection_string.as_deref().filter(|s| !s.is_empty()) {
        return connection_string.to_string();
    }
    let mut parts = Vec::new();
    if let Some(host) = &pg.host {
        parts.push(format!("host={}", host));
    }
    if let Some(port) = pg.port {
        parts.push(format!("port={}", port));
    }
    if let Some(database) = &pg.database_name {
        parts.push(format!("dbname={}", database));
    }
    if let Some(user) = &pg.user_name {
        parts.push(format!("user={}", user));
    }
    if let Some(password) = &pg.password {
        parts.push(format!("password={}", password));
    }
    parts.join(" ")
}

/// SQL statements that make `attached` queryable from a session, in order.
///
/// Every credential is escaped for a single-quoted literal before it is
/// interpolated.
pub fn attach_statements(attached: &AttachedDatabase) -> Result<Vec<String>> {
    let alias = quote_identifier(&attached.name);
    let statements = match attached.database_type {
        AttachedDatabaseType::Postgres => {
            let pg = attached
                .postgres_connection
                .as_ref()
                .ok_or_else(|| missing(attached, "postgresConnection"))?;
            let target = postgres_target(pg);
            if target.is_empty() {
                return Err(missing(attached, "postgresConnection.host"));
            }
            vec![
                "INSTALL postgres".to_string(),
                "LOAD postgres".to_string(),
                format!(
                    "ATTACH '{}' AS {} (TYPE postgres, READ_ONLY)",
                    escape_sql_string(&target),
                    alias
                ),
            ]
        }
        AttachedDatabaseType::Bigquery => {
            let bq = attached
                .bigquery_connection
                .as_ref()
                .ok_or_else(|| missing(attached, "bigqueryConnection"))?;
            let project_id = bq
                .default_project_id
                .clone()
                .or_else(|| {
                    bq.service_account_key_json
                        .as_deref()
                        .and_then(project_id_from_key)
                })
                .ok_or_else(|| missing(attached, "bigqueryConnection.defaultProjectId"))?;

            let mut statements = vec![
                "INSTALL bigquery FROM community".to_string(),
                "LOAD bigquery".to_string(),
            ];
            if let Some(key) = &bq.service_account_key_json {
                statements.push(format!(
                    "CREATE OR REPLACE SECRET {} (TYPE bigquery, {})",
                    secret_name(attached),
                    option("SERVICE_ACCOUNT_JSON", key)
                ));
            }
            let mut target = format!("project={}", project_id);
            if let Some(billing) = &bq.billing_project_id {
                target.push_str(&format!(" billing_project={}", billing));
            }
            statements.push(format!(
                "ATTACH '{}' AS {} (TYPE bigquery, READ_ONLY)",
                escape_sql_string(&target),
                alias
            ));
            statements
        }
        AttachedDatabaseType::Snowflake => {
            let sf = attached
                .snowflake_connection
                .as_ref()
                .ok_or_else(|| missing(attached, "snowflakeConnection"))?;
            let account = sf
                .account
                .as_deref()
                .ok_or_else(|| missing(attached, "snowflakeConnection.account"))?;
            let user = sf
                .username
                .as_deref()
                .ok_or_else(|| missing(attached, "snowflakeConnection.username"))?;

            let mut options = vec![option("ACCOUNT", account), option("USER", user)];
            match (&sf.password, &sf.private_key) {
                (Some(password), _) => options.push(option("PASSWORD", password)),
                (None, Some(key)) => options.push(option("PRIVATE_KEY", key)),
                (None, None) => return Err(missing(attached, "snowflakeConnection.password")),
            }
            if let Some(database) = &sf.database {
                options.push(option("DATABASE", database));
            }
            if let Some(warehouse) = &sf.warehouse {
                options.push(option("WAREHOUSE", warehouse));
            }

            let secret = secret_name(attached);
            vec![
                "INSTALL snowflake FROM community".to_string(),
                "LOAD snowflake".to_string(),
                format!(
                    "CREATE OR REPLACE SECRET {} (TYPE snowflake, {})",
                    secret,
                    options.join(", ")
                ),
                format!(
                    "ATTACH '' AS {} (TYPE snowflake, SECRET {}, READ_ONLY)",
                    alias, secret
                ),
            ]
        }
        AttachedDatabaseType::Motherduck => {
            let md = attached
                .motherduck_connection
                .as_ref()
                .ok_or_else(|| missing(attached, "motherduckConnection"))?;
            let token = md
                .access_token
                .as_deref()
                .ok_or_else(|| missing(attached, "motherduckConnection.accessToken"))?;
            let database = md.database.as_deref().unwrap_or(&attached.name);
            vec![
                "INSTALL motherduck".to_string(),
                "LOAD motherduck".to_string(),
                format!("SET motherduck_token = '{}'", escape_sql_string(token)),
                format!("ATTACH 'md:{}'", escape_sql_string(database)),
            ]
        }
        AttachedDatabaseType::Gcs => {
            let gcs = attached
                .gcs_connection
                .as_ref()
                .ok_or_else(|| missing(attached, "gcsConnection"))?;
            let key_id = gcs
                .key_id
                .as_deref()
                .ok_or_else(|| missing(attached, "gcsConnection.keyId"))?;
            let secret = gcs
                .secret
                .as_deref()
                .ok_or_else(|| missing(attached, "gcsConnection.secret"))?;
            vec![
                "INSTALL httpfs".to_string(),
                "LOAD httpfs".to_string(),
                format!(
                    "CREATE OR REPLACE SECRET {} (TYPE gcs, {}, {})",
                    secret_name(attached),
                    option("KEY_ID", key_id),
                    option("SECRET", secret)
                ),
            ]
        }
        AttachedDatabaseType::S3 => {
            let s3 = attached
                .s3_connection
                .as_ref()
                .ok_or_else(|| missing(attached, "s3Connection"))?;
            let key_id = s3
                .access_key_id
                .as_deref()
                .ok_or_else(|| missing(attached, "s3Connection.accessKeyId"))?;
            let secret = s3
                .secret_access_key
                .as_deref()
                .ok_or_else(|| missing(attached, "s3Connection.secretAccessKey"))?;

            let mut options = vec![option("KEY_ID", key_id), option("SECRET", secret)];
            if let Some(region) = &s3.region {
                options.push(option("REGION", region));
            }
            if let Some(endpoint) = &s3.endpoint {
                options.push(option("ENDPOINT", endpoint));
            }
            if let Some(token) = &s3.session_token {
                options.push(option("SESSION_TOKEN", token));
            }
            vec![
                "INSTALL httpfs".to_string(),
                "LOAD httpfs".to_string(),
                format!(
                    "CREATE OR REPLACE SECRET {} (TYPE s3, {})",
                    secret_name(attached),
                    options.join(", ")
                ),
            ]
        }
    };
    Ok(statements)
}

fn project_id_from_key(key_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(key_json).ok()?;
    value.get("project_id")?.as_str().map(String::from)
}

/// DuckDB reports re-attaching an existing alias with this phrase
pub(crate) fn is_already_attached(message: &str) -> bool {
    message.to_ascii_lowercase().contains("already attached")
}
