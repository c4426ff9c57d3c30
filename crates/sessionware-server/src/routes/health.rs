//! Health check endpoint.

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub session: SessionSummary,
}

#[derive(Serialize)]
pub struct SessionSummary {
    pub key: String,
    pub max_age: String,
    pub store: bool,
    pub rolling: bool,
    pub renew: bool,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let options = &state.session_options;

    Json(HealthStatus {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        session: SessionSummary {
            key: options.key.clone(),
            max_age: options.max_age.to_string(),
            store: options.store().is_some(),
            rolling: options.rolling,
            renew: options.renew,
        },
    })
}
