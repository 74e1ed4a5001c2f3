pub mod health;
pub mod metrics;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

pub fn create_router() -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(metrics::metrics))
        .layer(cors)
}
