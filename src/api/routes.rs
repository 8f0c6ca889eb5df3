//! Route Definitions

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Player actions
        .route("/bet", post(bet_handler))
        .route("/cashout", post(cashout_handler))
        // Read models
        .route("/wallet/:player_id", get(wallet_handler))
        .route("/round", get(round_handler))
        .route("/transactions/:player_id", get(transactions_handler))
        // Live round events
        .route("/ws", get(websocket_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
