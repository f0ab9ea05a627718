use chrono::{DateTime, Utc};
use sqlx::AnyPool;
use thiserror::Error;
use tracing::info;

use freshness_common::retention::{RetentionError, RetentionPolicy};

#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("cannot compute retention cutoff: {0}")]
    Retention(#[from] RetentionError),
    #[error("cleanup query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Rows removed by a single cleanup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupSummary {
    pub runs: u64,
    pub datasets: u64,
    pub resources: u64,
}

/// Deletes runs past the retention window, together with their datasets and resources.
pub struct Cleaner {
    pool: AnyPool,
    retention: RetentionPolicy,
}

impl Cleaner {
    pub fn new(pool: AnyPool, retention: RetentionPolicy) -> Self {
        Cleaner { pool, retention }
    }

    /// Delete every run dated strictly before `now` minus the retention window.
    ///
    /// All deletes happen in one transaction: either every expired run disappears with its
    /// dependants, or nothing is deleted.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupSummary, CleanupError> {
        let cutoff = self.retention.cutoff(now)?;
        info!(
            %cutoff,
            retention_days = self.retention.window().num_days(),
            "Running cleanup task..."
        );

        let cutoff = cutoff.timestamp();
        let mut tx = self.pool.begin().await?;

        // Children first, resources reference datasets which reference runs.
        let resources = sqlx::query(
            r#"
DELETE FROM resources
WHERE run_number IN (SELECT run_number FROM runs WHERE run_date < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let datasets = sqlx::query(
            r#"
DELETE FROM datasets
WHERE run_number IN (SELECT run_number FROM runs WHERE run_date < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let runs = sqlx::query("DELETE FROM runs WHERE run_date < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        let summary = CleanupSummary {
            runs,
            datasets,
            resources,
        };
        if summary.runs == 0 {
            info!("No runs older than the retention window");
        } else {
            info!(
                runs = summary.runs,
                datasets = summary.datasets,
                resources = summary.resources,
                "Deleted expired runs"
            );
        }

        Ok(summary)
    }
}
