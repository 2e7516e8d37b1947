//! HTTP API server for mailing-list membership.
//!
//! Provides REST endpoints for interests, addresses, customers and mailing
//! lists. Every source mutation is persisted and then synchronized into the
//! derived membership of the affected lists. Structured logging goes through
//! tracing and metrics are exported in Prometheus format.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use entity_store::EntityStore;
use membership::{MembershipSync, SyncOptions};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EntityStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/interests", post(routes::interests::create::<S>))
        .route("/addresses", post(routes::addresses::create::<S>))
        .route("/addresses/{id}", put(routes::addresses::update::<S>))
        .route("/customers", post(routes::customers::create::<S>))
        .route("/customers/{id}", get(routes::customers::get::<S>))
        .route(
            "/customers/{id}/interests",
            patch(routes::customers::change_interests::<S>),
        )
        .route(
            "/customers/{id}/active",
            put(routes::customers::set_activity::<S>),
        )
        .route("/mailing-lists", post(routes::mailing_lists::create::<S>))
        .route(
            "/mailing-lists/rebuild",
            post(routes::mailing_lists::rebuild::<S>),
        )
        .route("/mailing-lists/{id}", get(routes::mailing_lists::get::<S>))
        .route(
            "/mailing-lists/{id}/interests",
            put(routes::mailing_lists::set_interests::<S>),
        )
        .route(
            "/mailing-lists/{id}/audit",
            get(routes::mailing_lists::audit::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around `store`.
pub fn create_default_state<S: EntityStore + 'static>(
    store: S,
    options: SyncOptions,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        sync: MembershipSync::with_options(store, options),
    })
}
