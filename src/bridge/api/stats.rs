//! Bridge statistics.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::bridge::Bridge;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub viewers: usize,
    pub bus: String,
}

pub async fn bridge_stats(State(bridge): State<Bridge>) -> Json<StatsResponse> {
    Json(StatsResponse {
        viewers: bridge.viewers().len().await,
        bus: bridge.bus_name().to_string(),
    })
}
