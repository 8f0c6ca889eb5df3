//! Request Handlers

use super::{errors::ApiError, middleware::RequestId, models::*, websocket::WebSocketManager};
use crate::{
    games::{BetCashoutCoordinator, CashoutReceipt, TransactionRecord, WalletSummary},
    metrics::EngineMetrics,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub coordinator: Arc<BetCashoutCoordinator>,
    pub websocket_manager: Arc<WebSocketManager>,
    pub metrics: Arc<EngineMetrics>,
    pub version: String,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        websocket_clients: state.websocket_manager.client_count(),
    })
}

/// POST /bet
pub async fn bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BetRequest>, JsonRejection>,
) -> Result<Json<BetResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(request_id.0.clone(), e.body_text()))?;

    let usd_amount = match request.usd_amount {
        Some(amount) if !request.player_id.is_empty() && !request.crypto_type.is_empty() => amount,
        _ => {
            return Err(ApiError::bad_request(
                request_id.0,
                "Missing required fields".to_string(),
            ))
        }
    };

    let bet = state
        .coordinator
        .place_bet(&request.player_id, usd_amount, &request.crypto_type)
        .await
        .map_err(|e| ApiError::game(request_id.0.clone(), e))?;

    Ok(Json(BetResponse {
        message: "Bet placed successfully".to_string(),
        bet,
    }))
}

/// POST /cashout
pub async fn cashout_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CashoutRequest>, JsonRejection>,
) -> Result<Json<CashoutReceipt>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(request_id.0.clone(), e.body_text()))?;
    if request.player_id.is_empty() {
        return Err(ApiError::bad_request(request_id.0, "Missing playerId".to_string()));
    }

    state
        .coordinator
        .cashout(&request.player_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::game(request_id.0, e))
}

/// GET /wallet/:player_id
pub async fn wallet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(player_id): Path<String>,
) -> Result<Json<WalletSummary>, ApiError> {
    state
        .coordinator
        .wallet(&player_id)
        .await
        .map_err(|e| ApiError::game(request_id.0.clone(), e))?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(request_id.0, "User not found".to_string()))
}

/// GET /round
pub async fn round_handler(State(state): State<Arc<AppState>>) -> Json<RoundResponse> {
    Json(RoundResponse {
        round: state.coordinator.round_snapshot().await,
    })
}

/// GET /transactions/:player_id
pub async fn transactions_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(player_id): Path<String>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    state
        .coordinator
        .transactions(&player_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::game(request_id.0, e))
}

/// GET /metrics in Prometheus text format
pub async fn metrics_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    state.metrics.websocket_clients.set(state.websocket_manager.client_count() as i64);
    let body = state
        .metrics
        .to_prometheus_format()
        .map_err(|e| ApiError::internal_error(request_id.0, e.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
