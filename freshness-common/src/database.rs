//! Connection parameters and pool setup for the freshness database.
//!
//! Connections go through sqlx's `Any` driver so the same queries run against the
//! production PostgreSQL database and the local SQLite files used for clones and tests.
use std::fmt;

use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::migrate::Migrator;
use sqlx::AnyPool;
use thiserror::Error;
use url::Url;

static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

/// Used when neither parameters nor a connection string are supplied.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://test_freshness.db?mode=rwc";
/// Where `clone` writes to unless told otherwise.
pub const DEFAULT_CLONE_DATABASE_URL: &str = "sqlite://freshness.db?mode=rwc";

/// Errors raised while turning user input into connection parameters.
#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("malformed connection parameter {0:?}, expected key=value")]
    MalformedPair(String),
    #[error("unknown connection parameter {0:?}")]
    UnknownKey(String),
    #[error("missing required connection parameter {0:?}")]
    MissingKey(&'static str),
    #[error("unsupported database driver {0:?}")]
    UnsupportedDriver(String),
    #[error("invalid value {value:?} for connection parameter {key:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid connection url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors raised while talking to a database.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("failed to connect to {url}: {error}")]
    Connect { url: String, error: sqlx::Error },
    #[error("failed to apply migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A resolved connection string for a freshness database.
///
/// Displaying a `ConnectionParams` redacts any password, so it is safe to log.
pub struct ConnectionParams {
    url: String,
}

impl ConnectionParams {
    /// Build parameters from a connection string.
    ///
    /// Strings without a scheme are assumed to be PostgreSQL connection strings,
    /// e.g. `user:pass@host/freshness`.
    pub fn from_url(url: &str) -> Result<Self, ParamsError> {
        let url = if url.starts_with("sqlite:") || url.contains("://") {
            url.to_owned()
        } else {
            format!("postgresql://{}", url)
        };
        Url::parse(&url)?;

        Ok(Self { url })
    }

    /// Build parameters from a comma separated `key=value` list, e.g.
    /// `driver=postgresql,host=db,database=freshness,username=fresh,password=secret`.
    pub fn from_params(params: &str) -> Result<Self, ParamsError> {
        let mut driver = None;
        let mut database = None;
        let mut host = None;
        let mut port = None;
        let mut username = None;
        let mut password = None;

        for pair in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ParamsError::MalformedPair(pair.to_owned()))?;
            let value = value.trim();
            match key.trim() {
                "driver" | "dialect" => driver = Some(value),
                "database" => database = Some(value),
                "host" => host = Some(value),
                "port" => {
                    let parsed = value.parse::<u16>().map_err(|_| ParamsError::InvalidValue {
                        key: "port",
                        value: value.to_owned(),
                    })?;
                    port = Some(parsed);
                }
                "username" | "user" => username = Some(value),
                "password" => password = Some(value),
                other => return Err(ParamsError::UnknownKey(other.to_owned())),
            }
        }

        let database = database.ok_or(ParamsError::MissingKey("database"))?;

        match driver.unwrap_or("postgresql") {
            "sqlite" => Ok(Self {
                url: format!("sqlite://{}?mode=rwc", database),
            }),
            d if d.starts_with("postgres") => {
                let mut url = Url::parse(&format!("postgresql://{}", host.unwrap_or("localhost")))?;
                if let Some(username) = username {
                    url.set_username(username)
                        .map_err(|_| ParamsError::InvalidValue {
                            key: "username",
                            value: username.to_owned(),
                        })?;
                }
                if let Some(password) = password {
                    url.set_password(Some(password))
                        .map_err(|_| ParamsError::InvalidValue {
                            key: "password",
                            value: "***".to_owned(),
                        })?;
                }
                url.set_port(port).map_err(|_| ParamsError::InvalidValue {
                    key: "port",
                    value: format!("{:?}", port),
                })?;
                url.set_path(&format!("/{}", database));

                Ok(Self { url: url.into() })
            }
            other => Err(ParamsError::UnsupportedDriver(other.to_owned())),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a connection pool for these parameters.
    pub async fn connect(&self, max_connections: u32) -> Result<AnyPool, DatabaseError> {
        install_default_drivers();
        tracing::debug!(url = %self, max_connections, "connecting to database");

        AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(&self.url)
            .await
            .map_err(|error| DatabaseError::Connect {
                url: self.to_string(),
                error,
            })
    }

    /// Open a connection pool and create the freshness tables in it if they are missing.
    pub async fn connect_and_migrate(&self, max_connections: u32) -> Result<AnyPool, DatabaseError> {
        let pool = self.connect(max_connections).await?;
        migrate(&pool).await?;

        Ok(pool)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_owned(),
        }
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Url::parse(&self.url) {
            Ok(mut url) if url.password().is_some() => {
                // Setting a password only fails for URLs that cannot carry one.
                let _ = url.set_password(Some("***"));
                write!(f, "{}", url)
            }
            _ => write!(f, "{}", self.url),
        }
    }
}

/// Create the runs, datasets and resources tables if they don't exist yet.
pub async fn migrate(pool: &AnyPool) -> Result<(), DatabaseError> {
    MIGRATOR.run(pool).await?;
    tracing::debug!("freshness schema is up to date");

    Ok(())
}
