//! Object API Handlers
//!
//! HTTP endpoints shared by every stored kind. The router instantiates
//! them once per kind (`list_objects::<Release>`, ...).

use axum::{
    Json,
    extract::{OriginalUri, Path, Query, State},
    http::StatusCode,
};
use canary_core::domain::meta::ObjectKey;
use canary_core::dto::StatusUpdate;
use serde::Deserialize;
use sqlx::PgPool;

use crate::api::error::{ApiError, ApiResult};
use crate::service::object::StoredKind;
use crate::service::object_service;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub namespace: Option<String>,
}

/// GET /api/v1/{kind}?namespace=
/// List objects of one kind
pub async fn list_objects<K: StoredKind>(
    State(pool): State<PgPool>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<K>>> {
    tracing::debug!("Listing {} objects", K::KIND);

    let objects = object_service::list::<K>(&pool, query.namespace.as_deref()).await?;

    Ok(Json(objects))
}

/// POST /api/v1/{kind}
/// Create an object
pub async fn create_object<K: StoredKind>(
    State(pool): State<PgPool>,
    Json(object): Json<K>,
) -> ApiResult<(StatusCode, Json<K>)> {
    tracing::info!("Creating {}: {}", K::KIND, object.metadata().key());

    let created = object_service::create(&pool, object).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/{kind}/{namespace}/{name}
/// Get one object
pub async fn get_object<K: StoredKind>(
    State(pool): State<PgPool>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<K>> {
    let key = ObjectKey::new(namespace, name);
    tracing::debug!("Getting {}: {}", K::KIND, key);

    let object = object_service::get::<K>(&pool, &key).await?;

    Ok(Json(object))
}

/// PUT /api/v1/{kind}/{namespace}/{name}
/// Replace the labels and spec of an object
pub async fn update_object<K: StoredKind>(
    State(pool): State<PgPool>,
    Path((namespace, name)): Path<(String, String)>,
    Json(object): Json<K>,
) -> ApiResult<Json<K>> {
    let key = ObjectKey::new(namespace, name);
    tracing::info!("Updating {}: {}", K::KIND, key);

    let updated = object_service::update(&pool, &key, object).await?;

    Ok(Json(updated))
}

/// PUT /api/v1/{kind}/{namespace}/{name}/status
/// Compare-and-swap the status of an object
pub async fn update_status<K: StoredKind>(
    State(pool): State<PgPool>,
    Path((namespace, name)): Path<(String, String)>,
    Json(req): Json<StatusUpdate<serde_json::Value>>,
) -> ApiResult<Json<K>> {
    let key = ObjectKey::new(namespace, name);

    let updated =
        object_service::update_status::<K>(&pool, &key, req.resource_version, req.status).await?;

    Ok(Json(updated))
}

/// DELETE /api/v1/{kind}/{namespace}/{name}
/// Delete an object
pub async fn delete_object<K: StoredKind>(
    State(pool): State<PgPool>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let key = ObjectKey::new(namespace, name);
    tracing::info!("Deleting {}: {}", K::KIND, key);

    object_service::delete::<K>(&pool, &key).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Unknown API paths answer with JSON instead of the UI's index page
pub async fn api_not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound(format!("no API route for {}", uri.path()))
}
