//! Rows of the freshness database: runs, the datasets checked in each run, and the
//! resources of those datasets.
//!
//! Timestamps are seconds since the Unix epoch (UTC).
use futures::stream::BoxStream;
use sqlx::any::AnyRow;
use sqlx::{Any, Decode, Executor, FromRow, Row, Type, TypeInfo, ValueRef};

#[derive(Clone, Debug, PartialEq, Eq, FromRow)]
/// One execution of the freshness checker.
pub struct Run {
    pub run_number: i64,
    pub run_date: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A dataset's freshness status within a run.
pub struct Dataset {
    pub run_number: i64,
    pub id: String,
    pub name: String,
    pub organization_id: Option<String>,
    /// Expected update frequency in days.
    pub update_frequency: Option<i64>,
    pub last_modified: Option<i64>,
    pub latest_of_modifieds: Option<i64>,
    pub what_updated: Option<String>,
    pub fresh: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A file belonging to a dataset within a run.
pub struct Resource {
    pub run_number: i64,
    pub id: String,
    pub dataset_id: String,
    pub name: String,
    pub url: String,
    pub last_modified: Option<i64>,
    pub what_updated: Option<String>,
    pub hash: Option<String>,
    pub when_checked: Option<i64>,
}

/// Read a nullable column.
///
/// The `Any` driver never reports a value as null, so `Option<T>` would try to decode
/// a NULL as `T` and fail. NULLs are recognised by their type instead.
fn try_get_nullable<'r, T>(row: &'r AnyRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: Decode<'r, Any> + Type<Any>,
{
    if row.try_get_raw(column)?.type_info().name() == "NULL" {
        return Ok(None);
    }

    row.try_get(column).map(Some)
}

impl<'r> FromRow<'r, AnyRow> for Dataset {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_number: row.try_get("run_number")?,
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            organization_id: try_get_nullable(row, "organization_id")?,
            update_frequency: try_get_nullable(row, "update_frequency")?,
            last_modified: try_get_nullable(row, "last_modified")?,
            latest_of_modifieds: try_get_nullable(row, "latest_of_modifieds")?,
            what_updated: try_get_nullable(row, "what_updated")?,
            fresh: try_get_nullable(row, "fresh")?,
        })
    }
}

impl<'r> FromRow<'r, AnyRow> for Resource {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_number: row.try_get("run_number")?,
            id: row.try_get("id")?,
            dataset_id: row.try_get("dataset_id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            last_modified: try_get_nullable(row, "last_modified")?,
            what_updated: try_get_nullable(row, "what_updated")?,
            hash: try_get_nullable(row, "hash")?,
            when_checked: try_get_nullable(row, "when_checked")?,
        })
    }
}

impl Run {
    pub fn new(run_number: i64, run_date: i64) -> Self {
        Self {
            run_number,
            run_date,
        }
    }

    /// Fetch every run, lowest run number first.
    pub async fn fetch_all<'c, E>(executor: E) -> Result<Vec<Run>, sqlx::Error>
    where
        E: Executor<'c, Database = Any>,
    {
        sqlx::query_as("SELECT run_number, run_date FROM runs ORDER BY run_number")
            .fetch_all(executor)
            .await
    }

    /// Insert this run, or overwrite the stored one with the same run number.
    pub async fn upsert<'c, E>(&self, executor: E) -> Result<(), sqlx::Error>
    where
        E: Executor<'c, Database = Any>,
    {
        sqlx::query(
            r#"
INSERT INTO runs (run_number, run_date)
VALUES ($1, $2)
ON CONFLICT (run_number) DO UPDATE SET run_date = excluded.run_date
            "#,
        )
        .bind(self.run_number)
        .bind(self.run_date)
        .execute(executor)
        .await?;

        Ok(())
    }
}

impl Dataset {
    pub fn new(run_number: i64, id: &str, name: &str) -> Self {
        Self {
            run_number,
            id: id.to_owned(),
            name: name.to_owned(),
            organization_id: None,
            update_frequency: None,
            last_modified: None,
            latest_of_modifieds: None,
            what_updated: None,
            fresh: None,
        }
    }

    /// Fetch the dataset with the lowest id in a run, if the run has any datasets.
    pub async fn fetch_first_in_run<'c, E>(
        executor: E,
        run_number: i64,
    ) -> Result<Option<Dataset>, sqlx::Error>
    where
        E: Executor<'c, Database = Any>,
    {
        sqlx::query_as(
            r#"
SELECT run_number, id, name, organization_id, update_frequency, last_modified,
       latest_of_modifieds, what_updated, fresh
FROM datasets
WHERE run_number = $1
ORDER BY id
LIMIT 1
            "#,
        )
        .bind(run_number)
        .fetch_optional(executor)
        .await
    }

    /// Insert this dataset, or overwrite the stored one with the same run number and id.
    pub async fn upsert<'c, E>(&self, executor: E) -> Result<(), sqlx::Error>
    where
        E: Executor<'c, Database = Any>,
    {
        sqlx::query(
            r#"
INSERT INTO datasets
    (run_number, id, name, organization_id, update_frequency, last_modified,
     latest_of_modifieds, what_updated, fresh)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (run_number, id) DO UPDATE SET
    name = excluded.name,
    organization_id = excluded.organization_id,
    update_frequency = excluded.update_frequency,
    last_modified = excluded.last_modified,
    latest_of_modifieds = excluded.latest_of_modifieds,
    what_updated = excluded.what_updated,
    fresh = excluded.fresh
            "#,
        )
        .bind(self.run_number)
        .bind(self.id.as_str())
        .bind(self.name.as_str())
        .bind(self.organization_id.as_deref())
        .bind(self.update_frequency)
        .bind(self.last_modified)
        .bind(self.latest_of_modifieds)
        .bind(self.what_updated.as_deref())
        .bind(self.fresh)
        .execute(executor)
        .await?;

        Ok(())
    }
}

impl Resource {
    pub fn new(run_number: i64, id: &str, dataset_id: &str, url: &str) -> Self {
        Self {
            run_number,
            id: id.to_owned(),
            dataset_id: dataset_id.to_owned(),
            name: id.to_owned(),
            url: url.to_owned(),
            last_modified: None,
            what_updated: None,
            hash: None,
            when_checked: None,
        }
    }

    /// Stream the resources of one dataset in one run.
    pub fn fetch_for_dataset<'e, E>(
        executor: E,
        run_number: i64,
        dataset_id: &str,
    ) -> BoxStream<'e, Result<Resource, sqlx::Error>>
    where
        E: Executor<'e, Database = Any> + 'e,
    {
        sqlx::query_as(
            r#"
SELECT run_number, id, dataset_id, name, url, last_modified, what_updated, hash, when_checked
FROM resources
WHERE run_number = $1 AND dataset_id = $2
ORDER BY id
            "#,
        )
        .bind(run_number)
        .bind(dataset_id.to_owned())
        .fetch(executor)
    }

    /// Insert this resource, or overwrite the stored one with the same run number and id.
    pub async fn upsert<'c, E>(&self, executor: E) -> Result<(), sqlx::Error>
    where
        E: Executor<'c, Database = Any>,
    {
        sqlx::query(
            r#"
INSERT INTO resources
    (run_number, id, dataset_id, name, url, last_modified, what_updated, hash, when_checked)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (run_number, id) DO UPDATE SET
    dataset_id = excluded.dataset_id,
    name = excluded.name,
    url = excluded.url,
    last_modified = excluded.last_modified,
    what_updated = excluded.what_updated,
    hash = excluded.hash,
    when_checked = excluded.when_checked
            "#,
        )
        .bind(self.run_number)
        .bind(self.id.as_str())
        .bind(self.dataset_id.as_str())
        .bind(self.name.as_str())
        .bind(self.url.as_str())
        .bind(self.last_modified)
        .bind(self.what_updated.as_deref())
        .bind(self.hash.as_deref())
        .bind(self.when_checked)
        .execute(executor)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ConnectionParams;
    use futures::TryStreamExt;
    use sqlx::AnyPool;

    async fn memory_pool() -> AnyPool {
        ConnectionParams::from_url("sqlite::memory:")
            .unwrap()
            .connect_and_migrate(1)
            .await
            .expect("failed to open in-memory database")
    }

    #[tokio::test]
    async fn test_run_upsert_overwrites() {
        let pool = memory_pool().await;

        Run::new(2, 200).upsert(&pool).await.unwrap();
        Run::new(1, 100).upsert(&pool).await.unwrap();
        Run::new(2, 250).upsert(&pool).await.unwrap();

        let runs = Run::fetch_all(&pool).await.unwrap();
        assert_eq!(runs, vec![Run::new(1, 100), Run::new(2, 250)]);
    }

    #[tokio::test]
    async fn test_first_dataset_in_run() {
        let pool = memory_pool().await;
        Run::new(1, 100).upsert(&pool).await.unwrap();
        Run::new(2, 200).upsert(&pool).await.unwrap();

        assert_eq!(Dataset::fetch_first_in_run(&pool, 1).await.unwrap(), None);

        let mut later = Dataset::new(1, "b", "Later");
        later.organization_id = Some("org".to_owned());
        later.fresh = Some(0);
        later.upsert(&pool).await.unwrap();
        Dataset::new(1, "a", "Earlier").upsert(&pool).await.unwrap();
        Dataset::new(2, "0", "Other run").upsert(&pool).await.unwrap();

        let first = Dataset::fetch_first_in_run(&pool, 1).await.unwrap();
        assert_eq!(first, Some(Dataset::new(1, "a", "Earlier")));
    }

    #[tokio::test]
    async fn test_dataset_upsert_overwrites() {
        let pool = memory_pool().await;
        Run::new(1, 100).upsert(&pool).await.unwrap();

        let mut dataset = Dataset::new(1, "a", "Name");
        dataset.upsert(&pool).await.unwrap();
        dataset.what_updated = Some("metadata".to_owned());
        dataset.update_frequency = Some(7);
        dataset.upsert(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM datasets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            Dataset::fetch_first_in_run(&pool, 1).await.unwrap(),
            Some(dataset)
        );
    }

    #[tokio::test]
    async fn test_resources_for_dataset() {
        let pool = memory_pool().await;
        Run::new(1, 100).upsert(&pool).await.unwrap();
        Dataset::new(1, "a", "A").upsert(&pool).await.unwrap();
        Dataset::new(1, "b", "B").upsert(&pool).await.unwrap();

        let mut checked = Resource::new(1, "r1", "a", "https://example.com/r1.csv");
        checked.hash = Some("abc".to_owned());
        checked.when_checked = Some(90);
        checked.upsert(&pool).await.unwrap();
        Resource::new(1, "r2", "a", "https://example.com/r2.csv")
            .upsert(&pool)
            .await
            .unwrap();
        Resource::new(1, "r3", "b", "https://example.com/r3.csv")
            .upsert(&pool)
            .await
            .unwrap();

        let resources: Vec<Resource> = Resource::fetch_for_dataset(&pool, 1, "a")
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            resources,
            vec![
                checked,
                Resource::new(1, "r2", "a", "https://example.com/r2.csv")
            ]
        );
    }

    #[tokio::test]
    async fn test_nullable_columns_round_trip() {
        let pool = memory_pool().await;
        Run::new(1, 100).upsert(&pool).await.unwrap();

        let empty = Dataset::new(1, "a", "No metadata");
        empty.upsert(&pool).await.unwrap();
        let mut filled = Dataset::new(1, "b", "Full metadata");
        filled.organization_id = Some("org".to_owned());
        filled.update_frequency = Some(30);
        filled.last_modified = Some(1_700_000_000);
        filled.latest_of_modifieds = Some(1_700_000_100);
        filled.what_updated = Some("data".to_owned());
        filled.fresh = Some(1);
        filled.upsert(&pool).await.unwrap();

        let bare = Resource::new(1, "r1", "a", "https://example.com/r1.csv");
        bare.upsert(&pool).await.unwrap();

        assert_eq!(
            Dataset::fetch_first_in_run(&pool, 1).await.unwrap(),
            Some(empty)
        );
        let resources: Vec<Resource> = Resource::fetch_for_dataset(&pool, 1, "a")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(resources, vec![bare]);

        // Overwriting with NULLs clears previously set columns.
        let mut cleared = filled.clone();
        cleared.organization_id = None;
        cleared.fresh = None;
        cleared.upsert(&pool).await.unwrap();
        sqlx::query("DELETE FROM resources WHERE dataset_id = 'a'")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM datasets WHERE id = 'a'")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(
            Dataset::fetch_first_in_run(&pool, 1).await.unwrap(),
            Some(cleared)
        );
    }
}
