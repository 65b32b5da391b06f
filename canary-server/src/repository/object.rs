//! Object Repository
//!
//! Handles all database operations on stored objects. Every write bumps
//! `resource_version`; conditional writes compare it first.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Table holding one object kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Releases,
    TestJobs,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Releases => "releases",
            Table::TestJobs => "test_jobs",
        }
    }
}

const COLUMNS: &str = "namespace, name, uid, resource_version, generation, \
                       creation_timestamp, labels, spec, status";

/// Object about to be inserted
#[derive(Debug, Clone)]
pub struct NewObject {
    pub namespace: String,
    pub name: String,
    pub labels: Value,
    pub spec: Value,
}

// =============================================================================
// Queries
// =============================================================================

/// Insert a new object; returns `None` if the key is already taken
pub async fn insert(
    pool: &PgPool,
    table: Table,
    object: NewObject,
) -> Result<Option<ObjectRow>, sqlx::Error> {
    let now = Utc::now();

    sqlx::query_as::<_, ObjectRow>(&format!(
        r#"
        INSERT INTO {table} ({COLUMNS})
        VALUES ($1, $2, $3, 1, 1, $4, $5, $6, '{{}}')
        ON CONFLICT (namespace, name) DO NOTHING
        RETURNING {COLUMNS}
        "#,
        table = table.name()
    ))
    .bind(&object.namespace)
    .bind(&object.name)
    .bind(Uuid::new_v4())
    .bind(now)
    .bind(&object.labels)
    .bind(&object.spec)
    .fetch_optional(pool)
    .await
}

/// Find an object by namespace and name
pub async fn find(
    pool: &PgPool,
    table: Table,
    namespace: &str,
    name: &str,
) -> Result<Option<ObjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ObjectRow>(&format!(
        "SELECT {COLUMNS} FROM {table} WHERE namespace = $1 AND name = $2",
        table = table.name()
    ))
    .bind(namespace)
    .bind(name)
    .fetch_optional(pool)
    .await
}

/// List objects, optionally restricted to one namespace
pub async fn list(
    pool: &PgPool,
    table: Table,
    namespace: Option<&str>,
) -> Result<Vec<ObjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ObjectRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM {table}
        WHERE $1::TEXT IS NULL OR namespace = $1
        ORDER BY namespace, name
        "#,
        table = table.name()
    ))
    .bind(namespace)
    .fetch_all(pool)
    .await
}

/// Replace labels and spec
///
/// `generation` only moves when the spec actually changed. With
/// `expected_version` set the write is skipped on mismatch.
pub async fn update_spec(
    pool: &PgPool,
    table: Table,
    namespace: &str,
    name: &str,
    expected_version: Option<i64>,
    labels: &Value,
    spec: &Value,
) -> Result<Option<ObjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ObjectRow>(&format!(
        r#"
        UPDATE {table}
        SET labels = $3,
            spec = $4,
            generation = generation + CASE WHEN spec IS DISTINCT FROM $4 THEN 1 ELSE 0 END,
            resource_version = resource_version + 1
        WHERE namespace = $1 AND name = $2
          AND ($5::BIGINT IS NULL OR resource_version = $5)
        RETURNING {COLUMNS}
        "#,
        table = table.name()
    ))
    .bind(namespace)
    .bind(name)
    .bind(labels)
    .bind(spec)
    .bind(expected_version)
    .fetch_optional(pool)
    .await
}

/// Compare-and-swap the status; `None` when the row is missing or moved on
pub async fn update_status(
    pool: &PgPool,
    table: Table,
    namespace: &str,
    name: &str,
    expected_version: i64,
    status: &Value,
) -> Result<Option<ObjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ObjectRow>(&format!(
        r#"
        UPDATE {table}
        SET status = $3, resource_version = resource_version + 1
        WHERE namespace = $1 AND name = $2 AND resource_version = $4
        RETURNING {COLUMNS}
        "#,
        table = table.name()
    ))
    .bind(namespace)
    .bind(name)
    .bind(status)
    .bind(expected_version)
    .fetch_optional(pool)
    .await
}

/// Delete an object
pub async fn delete(
    pool: &PgPool,
    table: Table,
    namespace: &str,
    name: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(&format!(
        "DELETE FROM {table} WHERE namespace = $1 AND name = $2",
        table = table.name()
    ))
    .bind(namespace)
    .bind(name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ObjectRow {
    pub namespace: String,
    pub name: String,
    pub uid: Uuid,
    pub resource_version: i64,
    pub generation: i64,
    pub creation_timestamp: DateTime<Utc>,
    pub labels: Value,
    pub spec: Value,
    pub status: Value,
}
