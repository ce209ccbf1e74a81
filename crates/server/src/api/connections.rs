//! Read-only view of the relay registry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use relay_core::{ConnectionId, ConnectionStatus};

use super::middleware::AuthOperator;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ConnectionListResponse {
    pub connections: Vec<ConnectionStatus>,
    pub active_transcodes: usize,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    AuthOperator(operator): AuthOperator,
) -> Json<ConnectionListResponse> {
    debug!(operator = %operator.name, "listing connections");
    let relay = state.relay();
    Json(ConnectionListResponse {
        connections: relay.connections().await,
        active_transcodes: relay.active_transcodes(),
    })
}

pub async fn get_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionStatus>, (StatusCode, Json<ErrorResponse>)> {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Connection not found: {}", id),
            }),
        )
    };

    let id: ConnectionId = id.parse().map_err(|_| not_found())?;
    state
        .relay()
        .connection(id)
        .await
        .map(Json)
        .ok_or_else(not_found)
}
