//! API Module
//!
//! HTTP API layer for the server, plus static serving of the web UI.

pub mod error;
pub mod health;
pub mod object;

use std::path::PathBuf;

use axum::{
    Router,
    routing::{get, put},
};
use canary_core::domain::release::Release;
use canary_core::domain::test_job::TestJob;
use sqlx::PgPool;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::service::object::StoredKind;

/// Create the main router with all endpoints
///
/// With a static directory, unknown non-API paths fall back to its
/// `index.html` so client-side routes resolve.
pub fn create_router(pool: PgPool, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .merge(kind_routes::<Release>("releases"))
        .merge(kind_routes::<TestJob>("testjobs"))
        .fallback(object::api_not_found);

    let router = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .nest("/api", api);

    let router = match static_dir {
        Some(dir) => {
            let index = dir.join("index.html");
            router.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)))
        }
        None => router,
    };

    router
        .with_state(pool)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// CRUD and status routes for one kind under `/v1/{plural}`
fn kind_routes<K: StoredKind>(plural: &str) -> Router<PgPool> {
    Router::new()
        .route(
            &format!("/v1/{}", plural),
            get(object::list_objects::<K>).post(object::create_object::<K>),
        )
        .route(
            &format!("/v1/{}/{{namespace}}/{{name}}", plural),
            get(object::get_object::<K>)
                .put(object::update_object::<K>)
                .delete(object::delete_object::<K>),
        )
        .route(
            &format!("/v1/{}/{{namespace}}/{{name}}/status", plural),
            put(object::update_status::<K>),
        )
}
