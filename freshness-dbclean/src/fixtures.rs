//! Helpers for seeding in-memory freshness databases in tests.
use freshness_common::database::ConnectionParams;
use freshness_common::models::{Dataset, Resource, Run};
use sqlx::AnyPool;

/// A migrated in-memory SQLite database. The pool holds a single connection, since
/// every new connection to `sqlite::memory:` opens a fresh database.
pub async fn memory_pool() -> AnyPool {
    ConnectionParams::from_url("sqlite::memory:")
        .unwrap()
        .connect_and_migrate(1)
        .await
        .expect("failed to open in-memory database")
}

pub async fn insert_run(pool: &AnyPool, run_number: i64, run_date: i64) {
    Run::new(run_number, run_date)
        .upsert(pool)
        .await
        .expect("failed to insert run");
}

pub async fn insert_dataset(pool: &AnyPool, run_number: i64, id: &str) {
    Dataset::new(run_number, id, &format!("dataset {}", id))
        .upsert(pool)
        .await
        .expect("failed to insert dataset");
}

pub async fn insert_resource(pool: &AnyPool, run_number: i64, dataset_id: &str, id: &str) {
    let mut resource = Resource::new(
        run_number,
        id,
        dataset_id,
        &format!("https://data.example.com/{}/{}.csv", dataset_id, id),
    );
    resource.hash = Some(format!("{}-{}", run_number, id));
    resource
        .upsert(pool)
        .await
        .expect("failed to insert resource");
}

pub async fn count(pool: &AnyPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .expect("failed to count rows")
}

pub async fn count_in_run(pool: &AnyPool, table: &str, run_number: i64) -> i64 {
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE run_number = $1",
        table
    ))
    .bind(run_number)
    .fetch_one(pool)
    .await
    .expect("failed to count rows")
}

/// Ids of the datasets stored for a run, sorted.
pub async fn dataset_ids(pool: &AnyPool, run_number: i64) -> Vec<String> {
    sqlx::query_scalar("SELECT id FROM datasets WHERE run_number = $1 ORDER BY id")
        .bind(run_number)
        .fetch_all(pool)
        .await
        .expect("failed to fetch dataset ids")
}

/// `(dataset_id, id)` of the resources stored for a run, sorted.
pub async fn resource_keys(pool: &AnyPool, run_number: i64) -> Vec<(String, String)> {
    sqlx::query_as("SELECT dataset_id, id FROM resources WHERE run_number = $1 ORDER BY id")
        .bind(run_number)
        .fetch_all(pool)
        .await
        .expect("failed to fetch resources")
}
