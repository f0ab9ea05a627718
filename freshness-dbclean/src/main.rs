use chrono::Utc;
use cleanup::Cleaner;
use clap::Parser;
use clone::Cloner;
use config::{Action, Args, Config};
use envconfig::Envconfig;
use eyre::{bail, Result, WrapErr};
use sqlx::AnyPool;

use freshness_common::database::ConnectionParams;
use freshness_common::retention::RetentionPolicy;

mod cleanup;
mod clone;
mod config;
#[cfg(test)]
mod fixtures;

/// An action with everything it needs resolved up front, so bad configuration is reported
/// before any database is opened.
enum Task {
    Clean { retention: RetentionPolicy },
    Clone { destination: ConnectionParams },
}

async fn run(task: Task, pool: &AnyPool, config: &Config) -> Result<()> {
    match task {
        Task::Clean { retention } => {
            let cleaner = Cleaner::new(pool.clone(), retention);
            cleaner
                .cleanup(Utc::now())
                .await
                .wrap_err("freshness database clean failed")?;
            tracing::info!("Freshness database clean completed!");
        }
        Task::Clone { destination } => {
            let cloner = Cloner::new(pool.clone());
            cloner
                .clone_database(&destination, config.max_connections)
                .await
                .wrap_err("freshness database clone failed")?;
            tracing::info!("Freshness database clone completed!");
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;

    tracing::info!("> Data freshness database clean {}", env!("CARGO_PKG_VERSION"));

    let params = config
        .source_params(&args)
        .wrap_err("invalid database connection parameters")?;
    tracing::info!("> Database parameters: {}", params);

    let task = match args.action {
        Action::Clean => {
            let retention = config
                .retention_policy(Utc::now())
                .wrap_err("invalid RETENTION_DAYS")?;
            Task::Clean { retention }
        }
        Action::Clone => {
            let destination = config
                .clone_params(&args)
                .wrap_err("invalid clone database connection string")?;
            if destination == params {
                bail!("refusing to clone {} into itself", params);
            }
            Task::Clone { destination }
        }
    };

    let pool = params
        .connect(config.max_connections)
        .await
        .wrap_err("failed to open freshness database")?;

    let result = run(task, &pool, &config).await;
    pool.close().await;

    result
}
