//! `quay` - inspect and query projects from the command line

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "quay", version, about = "Inspect and query quay projects")]
struct Cli {
    /// Server root holding publisher.config.json
    #[arg(long, env = "QUAY_ROOT", default_value = ".", global = true)]
    root: PathBuf,

    /// Reject every mutation regardless of the config file
    #[arg(long, env = "QUAY_FROZEN_CONFIG", global = true)]
    frozen_config: bool,

    /// Upper bound for connection probes, in milliseconds
    #[arg(long, env = "QUAY_PROBE_TIMEOUT_MS", default_value_t = 30_000, global = true)]
    probe_timeout_ms: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show whether the catalog loaded cleanly
    Health,
    /// List projects
    Projects,
    /// List the packages of a project
    Packages { project: String },
    /// List the models and notebooks of a package
    Models { project: String, package: String },
    /// List project-level connections
    Connections { project: String },
    /// Run a query against a model
    Query {
        project: String,
        package: String,
        model: String,
        /// Select every row of a source
        #[arg(long, group = "target")]
        source: Option<String>,
        /// Run a named query
        #[arg(long = "query-name", group = "target")]
        query_name: Option<String>,
        /// Run ad-hoc SQL on the model's connection
        #[arg(long, group = "target")]
        sql: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Probe a project connection, or a descriptor file with --file
    TestConnection {
        project: String,
        connection: Option<String>,
        /// JSON connection descriptor to test instead of a configured one
        #[arg(long, conflicts_with = "connection")]
        file: Option<PathBuf>,
    },
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);
    commands::run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_arguments() {
        let cli = Cli::try_parse_from([
            "quay", "--root", "/srv", "query", "P", "Q", "flights.malloy", "--query-name",
            "by_carrier", "--limit", "5",
        ])
        .unwrap();

        assert_eq!(cli.root, PathBuf::from("/srv"));
        match cli.command {
            Command::Query {
                query_name, limit, source, ..
            } => {
                assert_eq!(query_name.as_deref(), Some("by_carrier"));
                assert_eq!(limit, Some(5));
                assert_eq!(source, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_query_targets_are_exclusive() {
        let result = Cli::try_parse_from([
            "quay", "query", "P", "Q", "m.malloy", "--source", "a", "--sql", "SELECT 1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["quay", "projects", "--frozen-config", "--log-format", "json"])
            .unwrap();
        assert!(cli.frozen_config);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
