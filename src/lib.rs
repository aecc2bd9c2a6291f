//! Hook Deploy Agent - webhook 驱动的部署代理
//!
//! 接收源码仓库 push 事件和手动触发，串成有序的部署队列：
//! 签名校验 → 项目/分支解析 → FIFO 队列 → 顺序执行命令 → 状态通知

pub mod error;
pub mod middleware;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod api;
pub mod services;

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{EnvConfig, ProjectRegistry};
use crate::state::AppState;

/// 运行时参数（命令行覆盖环境变量）
#[derive(Debug, Default)]
pub struct RuntimeConfig {
    pub port_override: Option<u16>,
    pub config_override: Option<String>,
}

/// 初始化并运行服务
pub async fn init_and_run(runtime: RuntimeConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }
    if let Some(path) = runtime.config_override {
        config.config_path = path;
    }

    let registry = match ProjectRegistry::load_from_path(&config.config_path) {
        Ok(registry) => registry,
        Err(e) => {
            error!(
                config_path = %config.config_path,
                error = %e,
                "Failed to load project config, starting with an empty registry"
            );
            ProjectRegistry::from_document(Default::default())
        }
    };
    if registry.is_empty() {
        warn!("No projects configured; webhooks will be rejected until /config/reload succeeds");
    }

    let port = config.port;
    let state = Arc::new(AppState::new(config, registry));
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listen address");
    info!(addr = %addr, "hook-deploy-agent listening");

    axum::serve(listener, app).await.expect("Server error");
}
