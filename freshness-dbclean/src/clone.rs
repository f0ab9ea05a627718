use futures::TryStreamExt;
use sqlx::AnyPool;
use tracing::info;

use freshness_common::database::{ConnectionParams, DatabaseError};
use freshness_common::models::{Dataset, Resource, Run};

/// Rows written to the destination by a clone.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloneSummary {
    pub runs: u64,
    pub datasets: u64,
    pub resources: u64,
}

/// Copies every run into another database, keeping only one dataset per run so the copy
/// stays small enough for testing.
pub struct Cloner {
    source: AnyPool,
}

impl Cloner {
    pub fn new(source: AnyPool) -> Self {
        Cloner { source }
    }

    /// Open the destination database, create its tables if needed and clone into it.
    pub async fn clone_database(
        &self,
        destination: &ConnectionParams,
        max_connections: u32,
    ) -> Result<CloneSummary, DatabaseError> {
        info!(%destination, "Cloning freshness database");

        let pool = destination.connect_and_migrate(max_connections).await?;
        let result = self.clone_into(&pool).await;
        pool.close().await;

        result
    }

    /// Upsert every source run into `destination` along with the dataset with the lowest id
    /// in that run and that dataset's resources. Each run is committed on its own.
    ///
    /// Rows are matched by primary key, so cloning into a previous clone updates it in place.
    pub async fn clone_into(&self, destination: &AnyPool) -> Result<CloneSummary, DatabaseError> {
        let mut summary = CloneSummary::default();

        for run in Run::fetch_all(&self.source).await? {
            let run_number = run.run_number;
            info!(run_number, "Adding run");

            let mut tx = destination.begin().await?;
            run.upsert(&mut *tx).await?;
            summary.runs += 1;

            match Dataset::fetch_first_in_run(&self.source, run_number).await? {
                None => info!(run_number, "No datasets in run"),
                Some(dataset) => {
                    dataset.upsert(&mut *tx).await?;
                    summary.datasets += 1;

                    let mut resources =
                        Resource::fetch_for_dataset(&self.source, run_number, &dataset.id);
                    while let Some(resource) = resources.try_next().await? {
                        resource.upsert(&mut *tx).await?;
                        summary.resources += 1;
                    }
                }
            }

            tx.commit().await?;
        }

        info!(
            runs = summary.runs,
            datasets = summary.datasets,
            resources = summary.resources,
            "Cloned runs"
        );

        Ok(summary)
    }
}
