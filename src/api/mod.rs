//! HTTP adapter (spec.md §6): exactly the six read endpoints, not the
//! teacher's full PIVX-explorer surface.

pub mod handlers;
pub mod types;

pub use handlers::ApiState;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/address/{address}/balance", get(handlers::get_balance))
        .route("/address/{address}/utxos", get(handlers::list_utxos))
        .route("/transaction/{txid}", get(handlers::get_transaction))
        .route("/token/{ref}", get(handlers::get_token))
        .route("/holders/count/{asset}", get(handlers::count_holders))
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}
