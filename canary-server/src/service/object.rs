//! Object Service
//!
//! Create, read, replace, status-write and delete for any stored kind.

use canary_core::domain::meta::{ObjectKey, ObjectMeta, is_dns1123_label};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use sqlx::PgPool;

use crate::repository::object_repository::{self, NewObject, ObjectRow, Table};

/// A kind the server can persist
pub trait StoredKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Status: Serialize + DeserializeOwned + Send + Sync + 'static;

    const KIND: &'static str;
    const TABLE: Table;

    fn metadata(&self) -> &ObjectMeta;

    /// Kind-specific checks on the desired configuration
    fn validate(&self) -> std::result::Result<(), String>;
}

/// Service error type
#[derive(Debug)]
pub enum ObjectError {
    NotFound(String),
    AlreadyExists(String),
    Conflict(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
    SerializationError(serde_json::Error),
}

impl From<sqlx::Error> for ObjectError {
    fn from(err: sqlx::Error) -> Self {
        ObjectError::DatabaseError(err)
    }
}

impl From<serde_json::Error> for ObjectError {
    fn from(err: serde_json::Error) -> Self {
        ObjectError::SerializationError(err)
    }
}

pub type Result<T> = std::result::Result<T, ObjectError>;

/// Create a new object
///
/// Server-owned metadata and the status are reset.
pub async fn create<K: StoredKind>(pool: &PgPool, object: K) -> Result<K> {
    validate_object(&object)?;

    let key = object.metadata().key();
    let (labels, spec) = split_object(&object)?;

    let row = object_repository::insert(
        pool,
        K::TABLE,
        NewObject {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            labels,
            spec,
        },
    )
    .await?
    .ok_or_else(|| ObjectError::AlreadyExists(format!("{} {} already exists", K::KIND, key)))?;

    tracing::info!("{} created: {} ({})", K::KIND, key, row.uid);

    into_object(row)
}

/// Get an object by key
pub async fn get<K: StoredKind>(pool: &PgPool, key: &ObjectKey) -> Result<K> {
    let row = object_repository::find(pool, K::TABLE, &key.namespace, &key.name)
        .await?
        .ok_or_else(|| not_found::<K>(key))?;

    into_object(row)
}

/// List objects, optionally restricted to one namespace
pub async fn list<K: StoredKind>(pool: &PgPool, namespace: Option<&str>) -> Result<Vec<K>> {
    let rows = object_repository::list(pool, K::TABLE, namespace).await?;
    rows.into_iter().map(into_object).collect()
}

/// Replace the labels and spec of an existing object
///
/// A non-zero resource version in the body makes the write conditional.
pub async fn update<K: StoredKind>(pool: &PgPool, key: &ObjectKey, object: K) -> Result<K> {
    if object.metadata().key() != *key {
        return Err(ObjectError::ValidationError(format!(
            "body refers to {}, path to {}",
            object.metadata().key(),
            key
        )));
    }
    validate_object(&object)?;

    let expected = Some(object.metadata().resource_version).filter(|rv| *rv != 0);
    let (labels, spec) = split_object(&object)?;

    let row = object_repository::update_spec(
        pool,
        K::TABLE,
        &key.namespace,
        &key.name,
        expected,
        &labels,
        &spec,
    )
    .await?;

    match row {
        Some(row) => {
            tracing::info!(
                "{} updated: {} (generation {})",
                K::KIND,
                key,
                row.generation
            );
            into_object(row)
        }
        None => Err(missing_or_conflict::<K>(pool, key).await),
    }
}

/// Compare-and-swap the status of an object
pub async fn update_status<K: StoredKind>(
    pool: &PgPool,
    key: &ObjectKey,
    resource_version: i64,
    status: Value,
) -> Result<K> {
    serde_json::from_value::<K::Status>(status.clone())
        .map_err(|e| ObjectError::ValidationError(format!("invalid status: {}", e)))?;

    let row = object_repository::update_status(
        pool,
        K::TABLE,
        &key.namespace,
        &key.name,
        resource_version,
        &status,
    )
    .await?;

    match row {
        Some(row) => {
            tracing::debug!(
                "{} status written: {} (resource version {})",
                K::KIND,
                key,
                row.resource_version
            );
            into_object(row)
        }
        None => Err(missing_or_conflict::<K>(pool, key).await),
    }
}

/// Delete an object
pub async fn delete<K: StoredKind>(pool: &PgPool, key: &ObjectKey) -> Result<()> {
    let deleted = object_repository::delete(pool, K::TABLE, &key.namespace, &key.name).await?;

    if !deleted {
        return Err(not_found::<K>(key));
    }

    tracing::info!("{} deleted: {}", K::KIND, key);

    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn not_found<K: StoredKind>(key: &ObjectKey) -> ObjectError {
    ObjectError::NotFound(format!("{} {} not found", K::KIND, key))
}

/// Tells a stale write apart from a vanished object
async fn missing_or_conflict<K: StoredKind>(pool: &PgPool, key: &ObjectKey) -> ObjectError {
    match object_repository::find(pool, K::TABLE, &key.namespace, &key.name).await {
        Ok(Some(row)) => ObjectError::Conflict(format!(
            "{} {} was modified (resource version is now {})",
            K::KIND,
            key,
            row.resource_version
        )),
        Ok(None) => not_found::<K>(key),
        Err(e) => ObjectError::DatabaseError(e),
    }
}

fn validate_object<K: StoredKind>(object: &K) -> Result<()> {
    let meta = object.metadata();
    validate_name("metadata.name", &meta.name)?;
    validate_name("metadata.namespace", &meta.namespace)?;
    object.validate().map_err(ObjectError::ValidationError)
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    if !is_dns1123_label(value) {
        return Err(ObjectError::ValidationError(format!(
            "{} '{}' must be a DNS-1123 label (lowercase alphanumerics and '-', at most 63 characters)",
            field, value
        )));
    }
    Ok(())
}

/// Extracts the persisted labels and spec of an object
fn split_object<K: StoredKind>(object: &K) -> Result<(Value, Value)> {
    let mut value = serde_json::to_value(object)?;
    let spec = value
        .get_mut("spec")
        .map(Value::take)
        .ok_or_else(|| ObjectError::ValidationError("spec is required".to_string()))?;
    let labels = serde_json::to_value(&object.metadata().labels)?;
    Ok((labels, spec))
}

/// Rebuilds the API object from a row
pub(crate) fn into_object<K: StoredKind>(row: ObjectRow) -> Result<K> {
    let labels = serde_json::from_value(row.labels)?;
    let metadata = ObjectMeta {
        name: row.name,
        namespace: row.namespace,
        uid: row.uid,
        resource_version: row.resource_version,
        generation: row.generation,
        creation_timestamp: Some(row.creation_timestamp),
        labels,
        owner_references: Vec::new(),
    };

    let value = serde_json::json!({
        "apiVersion": canary_core::domain::meta::API_VERSION,
        "kind": K::KIND,
        "metadata": metadata,
        "spec": row.spec,
        "status": row.status,
    });

    Ok(serde_json::from_value(value)?)
}
