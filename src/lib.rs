pub mod config;
pub mod coordinator;
pub mod handlers;
pub mod hub;
pub mod metrics;
pub mod models;
pub mod protocol;
pub mod schema;
pub mod store;
pub mod utils;
pub mod ws_registry;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::hub::{store_worker, Hub, HubHandle, PRUNE_INTERVAL};
use crate::metrics::Metrics;
use crate::store::Store;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub hub: HubHandle,
    pub metrics: Metrics,
}

impl AppState {
    /// Start the store worker and the hub. Must be called inside a tokio runtime.
    pub fn start(config: Config, store: Arc<dyn Store>) -> Result<Self, prometheus::Error> {
        let metrics = Metrics::new()?;
        let (store_tx, _worker) = store_worker::spawn(store.clone());
        let coordinator = Coordinator::new(store_tx, metrics.clone(), config.max_message_len);
        let (hub, _hub_task) = Hub::spawn(coordinator, PRUNE_INTERVAL, config.ws_idle_timeout_secs);
        Ok(Self {
            config: Arc::new(config),
            store,
            hub,
            metrics,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/signup", post(handlers::auth::post_signup))
        .route("/login", post(handlers::auth::post_login))
        .route("/profile", get(handlers::users::get_profile))
        .route("/users/online", get(handlers::users::get_online_users))
        .route("/admin/users", get(handlers::admin::get_users))
        .route("/admin/users/{username}", delete(handlers::admin::delete_user))
        .route("/admin/users/{username}/ban", post(handlers::admin::post_ban))
        .route("/admin/users/{username}/unban", post(handlers::admin::post_unban))
        .route("/ws", get(handlers::ws::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
