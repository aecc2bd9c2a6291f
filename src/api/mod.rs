//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod health;
pub mod trigger;
pub mod webhook;

use axum::{http::Uri, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ApiError;
use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health & Status
        .merge(health::router())
        // Webhook ingestion
        .merge(webhook::router())
        // Manual triggers & config reload
        .merge(trigger::router())
        // Unknown routes
        .fallback(fallback)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 未匹配路由统一返回 404 JSON
async fn fallback(uri: Uri) -> ApiError {
    ApiError::not_found(format!("Route {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn test_unknown_route_returns_json_not_found() {
        let response = fallback("/no-such-route".parse().unwrap())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
