//! 健康检查 API
//!
//! 包含 / 和 /health 端点

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    projects: Vec<String>,
    queue_length: usize,
    worker: &'static str,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
}

/// 健康检查
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let projects = state.registry.read().await.project_names();
    let queue_length = state.coordinator.queue_len().await;
    let worker = if state.coordinator.is_idle().await {
        "idle"
    } else {
        "processing"
    };

    Json(HealthResponse {
        status: "ok",
        service: "hook-deploy-agent",
        version: VERSION,
        timestamp: chrono::Utc::now().to_rfc3339(),
        projects,
        queue_length,
        worker,
    })
}
