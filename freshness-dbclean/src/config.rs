use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use envconfig::Envconfig;

use freshness_common::database::{ConnectionParams, ParamsError, DEFAULT_CLONE_DATABASE_URL};
use freshness_common::retention::{RetentionError, RetentionPolicy};

#[derive(Envconfig)]
pub struct Config {
    /// Fallback connection string when none is given on the command line.
    #[envconfig(from = "DB_URL")]
    pub db_url: Option<String>,

    /// Clone destination, a local SQLite file when unset.
    #[envconfig(from = "CLONE_DB_URL")]
    pub clone_db_url: Option<String>,

    #[envconfig(from = "RETENTION_DAYS", default = "30")]
    pub retention_days: i64,

    #[envconfig(from = "MAX_CONNECTIONS", default = "5")]
    pub max_connections: u32,
}

/// Data freshness database clean
#[derive(Parser, Debug)]
#[command(name = "freshness-dbclean", version, about)]
pub struct Args {
    /// Database connection string
    #[arg(short = 'd', long = "db_url", visible_alias = "db-url")]
    pub db_url: Option<String>,

    /// Database connection parameters. Overrides --db_url.
    #[arg(short = 'p', long = "db_params", visible_alias = "db-params")]
    pub db_params: Option<String>,

    /// Action to perform.
    #[arg(short, long, value_enum, default_value_t = Action::Clean)]
    pub action: Action,

    /// Destination for the clone action. Overrides CLONE_DB_URL.
    #[arg(long)]
    pub clone_db_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Delete runs older than the retention window.
    Clean,
    /// Copy a sample of every run into a separate database for testing.
    Clone,
}

impl Config {
    /// Resolve the freshness database to work on: `--db_params`, then `--db_url`,
    /// then `DB_URL`, then the local default.
    pub fn source_params(&self, args: &Args) -> Result<ConnectionParams, ParamsError> {
        if let Some(params) = non_empty(&args.db_params) {
            return ConnectionParams::from_params(params);
        }

        match non_empty(&args.db_url).or(non_empty(&self.db_url)) {
            Some(url) => ConnectionParams::from_url(url),
            None => Ok(ConnectionParams::default()),
        }
    }

    pub fn clone_params(&self, args: &Args) -> Result<ConnectionParams, ParamsError> {
        let url = non_empty(&args.clone_db_url)
            .or(non_empty(&self.clone_db_url))
            .unwrap_or(DEFAULT_CLONE_DATABASE_URL);

        ConnectionParams::from_url(url)
    }

    /// Build the retention policy, checking that its cutoff can be computed from `now`.
    pub fn retention_policy(&self, now: DateTime<Utc>) -> Result<RetentionPolicy, RetentionError> {
        let policy = RetentionPolicy::from_days(self.retention_days)?;
        policy.cutoff(now)?;

        Ok(policy)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
