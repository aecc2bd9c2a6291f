//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::project::RegistryLoadError;
use crate::config::{EnvConfig, ProjectRegistry};
use crate::infra::Notifier;
use crate::services::{DeployCoordinator, SharedRegistry};

/// 应用状态
pub struct AppState {
    /// 环境配置
    pub config: EnvConfig,
    /// 项目注册表（只读使用，重载时整体替换）
    pub registry: SharedRegistry,
    /// 部署协调器
    pub coordinator: Arc<DeployCoordinator>,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(config: EnvConfig, registry: ProjectRegistry) -> Self {
        info!(
            port = config.port,
            config_path = %config.config_path,
            project_count = registry.len(),
            "Loaded configuration"
        );

        for name in registry.project_names() {
            info!(project = %name, "Registered project");
        }

        let registry: SharedRegistry = Arc::new(RwLock::new(registry));
        let coordinator = DeployCoordinator::new(registry.clone(), Notifier::new());

        Self {
            config,
            registry,
            coordinator,
            started_at: Utc::now(),
        }
    }

    /// 重新加载项目配置，整体替换注册表
    ///
    /// 读者视角下替换是原子的：持有旧快照的请求继续用旧配置，
    /// 队列中任务出队时会重新解析
    pub async fn reload_registry(&self) -> Result<usize, RegistryLoadError> {
        let new_registry = ProjectRegistry::load_from_path(&self.config.config_path)?;
        let count = new_registry.len();
        *self.registry.write().await = new_registry;
        info!(project_count = count, "Project registry reloaded");
        Ok(count)
    }
}
