use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Both kinds share the same envelope layout
    for table in ["releases", "test_jobs"] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                namespace VARCHAR(63) NOT NULL,
                name VARCHAR(63) NOT NULL,
                uid UUID NOT NULL UNIQUE,
                resource_version BIGINT NOT NULL,
                generation BIGINT NOT NULL,
                creation_timestamp TIMESTAMPTZ NOT NULL,
                labels JSONB NOT NULL DEFAULT '{{}}',
                spec JSONB NOT NULL,
                status JSONB NOT NULL DEFAULT '{{}}',
                PRIMARY KEY (namespace, name)
            )
            "#
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_test_jobs_created ON test_jobs(creation_timestamp)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
