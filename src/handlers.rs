use crate::response::ApiError;
use crate::server::AppState;
use crate::time;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::Uri,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Health check
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": time::timestamp(),
        "service": state.config.app.name,
        "version": state.config.app.version,
    }))
}

/// Application and server information
pub async fn info_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let app = &state.config.app;
    let server = &state.config.server;

    Json(json!({
        "app": {
            "name": app.name,
            "version": app.version,
            "description": app.description,
            "author": app.author,
        },
        "server": {
            "host": server.host,
            "port": server.port,
            "mode": server.mode,
        },
        "timestamp": time::timestamp(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct HelloQuery {
    name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HelloResponse {
    pub message: String,
    pub time: String,
}

pub async fn hello_handler(
    query: Result<Query<HelloQuery>, QueryRejection>,
) -> Result<Json<HelloResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        debug!(error = %rejection.body_text(), "Rejected hello query");
        ApiError::BadRequest(format!("Invalid query string: {}", rejection.body_text()))
    })?;

    let name = query
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or("World");

    Ok(Json(HelloResponse {
        message: format!("Hello, {}!", name),
        time: time::now_string(None),
    }))
}

#[derive(Debug, Deserialize)]
pub struct EchoRequest {
    message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EchoResponse {
    pub echo: String,
    pub timestamp: i64,
}

/// Echo the posted message back. `message` must be present and non-empty.
pub async fn echo_handler(
    payload: Result<Json<EchoRequest>, JsonRejection>,
) -> Result<Json<EchoResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        debug!(error = %rejection.body_text(), "Rejected echo payload");
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let message = request
        .message
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Invalid request body: message is required".into()))?;

    Ok(Json(EchoResponse {
        echo: message,
        timestamp: time::timestamp(),
    }))
}

/// Fallback for unmatched routes
pub async fn not_found_handler(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}
