//! 手动触发 API
//!
//! POST /deploy、POST /rebuild — 按项目名手动触发部署；
//! POST /config/reload — 重新加载项目配置

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::env::constants::DEFAULT_TRIGGER_ACTOR;
use crate::domain::deploy::{DeployJob, JobTrigger};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 手动触发请求体（全部可选，亦可通过 header 传递）
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBody {
    pub project: Option<String>,
    pub branch: Option<String>,
    pub triggered_by: Option<String>,
}

/// 手动触发响应
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub status: String,
    pub position: usize,
    pub project: String,
    pub branch: String,
}

/// 配置重载响应
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub projects: usize,
}

/// 创建手动触发路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deploy", post(trigger_deploy))
        .route("/rebuild", post(trigger_deploy))
        .route("/config/reload", post(reload_config))
}

/// header 优先，body 字段兜底
fn header_or(headers: &HeaderMap, name: &str, fallback: Option<String>) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .or(fallback)
}

/// 手动触发部署
///
/// 项目按显示名称定位，兼容直接给仓库标识。
/// 只配置了一个环境的项目可省略分支
async fn trigger_deploy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<TriggerBody>>,
) -> ApiResult<Json<TriggerResponse>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let project = header_or(&headers, "x-project", body.project)
        .ok_or_else(|| ApiError::bad_request("Missing project (x-project header or 'project' field)"))?;
    let requested_branch = header_or(&headers, "x-branch", body.branch);
    let triggered_by = header_or(&headers, "x-triggered-by", body.triggered_by)
        .unwrap_or_else(|| DEFAULT_TRIGGER_ACTOR.to_string());

    let (project_key, project_name, branch) = {
        let registry = state.registry.read().await;
        let (key, config) = registry
            .resolve_by_name(&project)
            .or_else(|| registry.resolve_by_repository(&project))
            .ok_or_else(|| ApiError::bad_request(format!("Unknown project '{}'", project)))?;

        let branch = match requested_branch {
            Some(branch) => branch,
            None => {
                // 唯一环境时隐式选用
                let branches = config.available_branches();
                if branches.len() == 1 {
                    branches.into_iter().next().unwrap_or_default()
                } else {
                    return Err(ApiError::bad_request(format!(
                        "Branch is required for project '{}'. Available branches: {}",
                        config.name,
                        branches.join(", ")
                    )));
                }
            }
        };

        (key.to_string(), config.name.clone(), branch)
    };

    let job = DeployJob::new(project_key, branch.clone(), triggered_by, JobTrigger::Manual);
    let position = state
        .coordinator
        .enqueue(job)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    info!(
        project = %project_name,
        branch = %branch,
        position = position,
        "Manual deployment triggered"
    );

    Ok(Json(TriggerResponse {
        status: "queued".to_string(),
        position,
        project: project_name,
        branch,
    }))
}

/// 重新加载项目配置
async fn reload_config(State(state): State<Arc<AppState>>) -> ApiResult<Json<ReloadResponse>> {
    let projects = state
        .reload_registry()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to reload config: {}", e)))?;

    Ok(Json(ReloadResponse {
        success: true,
        projects,
    }))
}
