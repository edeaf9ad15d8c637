//! HTTP route handlers for `credvault`.
//!
//! Routes are organized by service:
//! - `data`: credential reads, writes, generation, regeneration, search
//! - `certificates`: certificate summaries and version management
//! - `permissions`: permission entries
//! - `health`: liveness

pub mod certificates;
pub mod data;
pub mod health;
pub mod permissions;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware as axum_mw;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::{ACTOR_HEADER, actor_middleware};
use crate::state::AppState;

/// Maximum number of bulk regenerations running at once.
const BULK_CONCURRENCY: usize = 4;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let bulk = Router::new()
        .route(
            "/api/v1/bulk-regenerate",
            axum::routing::post(data::bulk_regenerate),
        )
        .layer(tower::limit::ConcurrencyLimitLayer::new(BULK_CONCURRENCY));

    let api = Router::new()
        .nest("/api/v1", data::router())
        .merge(bulk)
        .nest("/api/v1/certificates", certificates::router())
        .nest("/api/v1/permissions", permissions::router())
        .route_layer(axum_mw::from_fn(actor_middleware));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(ACTOR_HEADER)]);

    Router::new()
        .merge(health::router())
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
