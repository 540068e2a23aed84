//! HTTP surface of the order fulfillment core.
//!
//! Exposes orders, inventory and payments over JSON, authenticates callers
//! with HS256 bearer tokens, rate-limits the two write endpoints that start
//! work (order and payment creation) and serves health and Prometheus
//! metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use clients::{
    CatalogLookup, InMemoryCatalog, NotificationDispatcher, NotificationSink,
    TracingNotificationSink,
};
use common::{Clock, SystemClock};
use inventory::{InMemoryInventoryLedger, InventoryLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{InMemoryOrderStore, OrderOrchestrator};
use payments::{InMemoryPaymentStore, PaymentSettlement};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::TokenKeys;
use config::Config;
use rate_limit::RateLimiter;

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub orders: OrderOrchestrator,
    pub ledger: Arc<dyn InventoryLedger>,
    pub payments: PaymentSettlement,
    pub tokens: Arc<TokenKeys>,
    pub limiter: Arc<RateLimiter>,
}

/// Outbound collaborators and the ledger backing the services.
pub struct Adapters {
    pub catalog: Arc<dyn CatalogLookup>,
    pub ledger: Arc<dyn InventoryLedger>,
    pub notifications: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

impl Adapters {
    /// Demo catalog, in-memory ledger and log-only notifications.
    pub fn in_memory() -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalog::demo()),
            ledger: Arc::new(InMemoryInventoryLedger::new()),
            notifications: Arc::new(TracingNotificationSink),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Wires the services together. Must run inside a tokio runtime, since the
/// notification worker is spawned here.
pub fn build_state(config: &Config, adapters: Adapters) -> AppState {
    let (dispatcher, _worker) = NotificationDispatcher::spawn(
        adapters.notifications,
        config.notification_queue_capacity,
    );

    let orders = OrderOrchestrator::new(
        adapters.catalog,
        adapters.ledger.clone(),
        Arc::new(InMemoryOrderStore::new()),
        dispatcher.clone(),
    )
    .with_clock(adapters.clock.clone());

    let payments = PaymentSettlement::with_options(
        Arc::new(InMemoryPaymentStore::new()),
        Arc::new(orders.clone()),
        dispatcher,
        config.settlement_delay,
        adapters.clock.clone(),
    );

    let limiter = RateLimiter::with_clock(
        config.rate_limit_max_requests,
        config.rate_limit_window,
        adapters.clock,
    );

    AppState {
        orders,
        ledger: adapters.ledger,
        payments,
        tokens: Arc::new(TokenKeys::new(&config.jwt_secret)),
        limiter: Arc::new(limiter),
    }
}

/// State with in-memory adapters, used when nothing external is configured.
pub fn create_default_state(config: &Config) -> AppState {
    build_state(config, Adapters::in_memory())
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let limit = from_fn_with_state(state.limiter.clone(), rate_limit::enforce);

    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route(
            "/orders",
            post(routes::orders::create)
                .layer(limit.clone())
                .get(routes::orders::list),
        )
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/orders/{id}/status", get(routes::orders::status))
        .route(
            "/inventory/{product_id}",
            get(routes::inventory::get).put(routes::inventory::restock),
        )
        .route(
            "/inventory/{product_id}/check",
            post(routes::inventory::check),
        )
        .route(
            "/inventory/{product_id}/reserve",
            post(routes::inventory::reserve),
        )
        .route(
            "/inventory/{product_id}/release",
            post(routes::inventory::release),
        )
        .route("/inventory/{product_id}/logs", get(routes::inventory::logs))
        .route(
            "/payments",
            post(routes::payments::create)
                .layer(limit)
                .get(routes::payments::list),
        )
        .route("/payments/{id}", get(routes::payments::get))
        .route("/payments/{id}/refund", post(routes::payments::refund))
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
