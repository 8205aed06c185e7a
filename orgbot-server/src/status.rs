//! The `/status` endpoint.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use orgbot_core::{Cursors, TeamSnapshot};

use crate::{AppState, SweepRecord};

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub organization: String,
    /// Cached teams. Reading them never triggers a refresh.
    pub teams: Option<TeamSnapshot>,
    pub cursors: Cursors,
    pub last_sweep: Option<SweepRecord>,
}

impl StatusData {
    pub async fn collect(state: &AppState, version: String) -> Self {
        Self {
            version,
            organization: state.assigner.org().to_string(),
            teams: state.registry.cached().await.map(|t| (*t).clone()),
            cursors: state.assigner.cursors().await,
            last_sweep: state.last_sweep.read().await.clone(),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn status_handler(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let Some(expected) = state.status_auth_token.as_deref() else {
        return StatusCode::FORBIDDEN.into_response();
    };

    if bearer_token(&headers) != Some(expected) {
        warn!("Rejected /status request with missing or invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let data = StatusData::collect(&state, crate::get_bot_version()).await;
    Json(data).into_response()
}
