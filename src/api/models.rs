//! API Request and Response Models

use crate::games::{BetReceipt, RoundSnapshot};
use serde::{Deserialize, Serialize};

/// POST /bet body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRequest {
    #[serde(default)]
    pub player_id: String,
    pub usd_amount: Option<f64>,
    #[serde(default)]
    pub crypto_type: String,
}

/// POST /cashout body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutRequest {
    #[serde(default)]
    pub player_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetResponse {
    pub message: String,
    pub bet: BetReceipt,
}

/// GET /round
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResponse {
    /// `None` between settlement and the next round
    pub round: Option<RoundSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub websocket_clients: u64,
}
