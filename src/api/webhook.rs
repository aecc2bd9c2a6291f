//! Webhook 接收 API
//!
//! POST /webhook — 源码仓库 push 事件入口。
//! 签名校验基于原始 body，必须在任何 JSON 处理之外保留原始字节

use axum::{body::Bytes, extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::deploy::{DeployJob, JobTrigger};
use crate::error::{ApiError, ApiResult};
use crate::middleware::signature::verify_signature;
use crate::state::AppState;

/// 签名 header 名称
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// push 事件 payload（宽松解析，只取用到的字段）
#[derive(Debug, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub repository: Option<RepositoryInfo>,
    pub sender: Option<SenderInfo>,
    #[serde(default)]
    pub forced: bool,
    pub head_commit: Option<HeadCommit>,
}

/// 仓库信息
#[derive(Debug, Deserialize)]
pub struct RepositoryInfo {
    pub html_url: Option<String>,
    pub name: Option<String>,
}

/// 触发者信息
#[derive(Debug, Deserialize)]
pub struct SenderInfo {
    pub login: Option<String>,
}

/// 提交信息
#[derive(Debug, Deserialize)]
pub struct HeadCommit {
    pub message: Option<String>,
}

/// Webhook 响应
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: String,
    /// 队列位置（1-based）
    pub position: usize,
    pub project: String,
    pub branch: String,
}

/// 创建 webhook 路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/webhook", post(handle_webhook))
}

/// 处理 push 事件
///
/// 流程：解析 payload → 定位项目（取得密钥）→ 校验签名 → 解析分支 → 入队。
/// 签名无效 403；项目/分支无法定位 400；成功 200 返回队列位置
async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let payload: PushPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid webhook payload: {}", e)))?;

    let identity = payload
        .repository
        .as_ref()
        .and_then(|repo| repo.html_url.clone().or_else(|| repo.name.clone()))
        .ok_or_else(|| ApiError::bad_request("Webhook payload has no repository identity"))?;

    // 密钥按项目配置，先定位项目才能校验签名
    let (project_key, project_name, secret) = {
        let registry = state.registry.read().await;
        let (key, project) = registry.resolve_by_repository(&identity).ok_or_else(|| {
            ApiError::bad_request(format!("No project configured for repository '{}'", identity))
        })?;
        (key.to_string(), project.name.clone(), project.secret.clone())
    };

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    verify_signature(&secret, &body, signature).map_err(|e| {
        warn!(project = %project_name, error = %e, "Webhook signature rejected");
        ApiError::forbidden(format!("Signature verification failed: {}", e))
    })?;

    let branch = payload
        .git_ref
        .as_deref()
        .and_then(branch_from_ref)
        .ok_or_else(|| ApiError::bad_request("Webhook payload has no usable ref"))?;

    let triggered_by = payload
        .sender
        .and_then(|sender| sender.login)
        .unwrap_or_else(|| "unknown".to_string());
    let commit_message = payload.head_commit.and_then(|commit| commit.message);

    let job = DeployJob::new(
        project_key,
        branch.clone(),
        triggered_by,
        JobTrigger::Push {
            forced: payload.forced,
        },
    )
    .with_commit_message(commit_message);

    let position = state
        .coordinator
        .enqueue(job)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    info!(
        project = %project_name,
        branch = %branch,
        position = position,
        "Webhook accepted"
    );

    Ok(Json(WebhookResponse {
        status: "queued".to_string(),
        position,
        project: project_name,
        branch,
    }))
}

/// 从 git ref 提取分支名
///
/// `refs/heads/` 前缀直接去掉（含 `/` 的分支名保留完整），
/// 非标准 ref 退化为取最后一个 `/` 段
fn branch_from_ref(git_ref: &str) -> Option<String> {
    let branch = match git_ref.strip_prefix("refs/heads/") {
        Some(rest) => rest,
        None => git_ref.rsplit('/').next().unwrap_or(""),
    };
    if branch.is_empty() {
        None
    } else {
        Some(branch.to_string())
    }
}
