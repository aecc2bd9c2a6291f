//! 项目配置与查找
//!
//! 从 config.json 加载仓库 → 项目 → 环境的只读映射，
//! 重新加载时整体替换（见 `AppState`）

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// 日志设置（可选）
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub verbose: bool,
}

/// 部署环境配置（按分支）
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    /// 部署工作目录
    pub deploy_path: String,
    /// 按顺序执行的命令列表
    pub commands: Vec<String>,
    /// 通知 webhook URL（兼容旧字段名 slackWebhookUrl）
    #[serde(default, alias = "slackWebhookUrl")]
    pub notify_url: Option<String>,
    /// 日志设置
    #[serde(default)]
    pub log_settings: Option<LogSettings>,
}

/// 项目配置
#[derive(Clone, Debug, Deserialize)]
pub struct ProjectConfig {
    /// 显示名称
    pub name: String,
    /// Webhook HMAC 密钥
    #[serde(default)]
    pub secret: String,
    /// 环境列表，key 为分支名
    pub environments: HashMap<String, EnvironmentConfig>,
}

impl ProjectConfig {
    /// 按分支名查找环境
    pub fn environment(&self, branch: &str) -> Option<&EnvironmentConfig> {
        self.environments.get(branch)
    }

    /// 已配置的分支列表（排序后用于错误提示）
    pub fn available_branches(&self) -> Vec<String> {
        let mut branches: Vec<String> = self.environments.keys().cloned().collect();
        branches.sort();
        branches
    }
}

/// 解析错误：项目或分支无法定位
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("No project configured for repository '{identity}'")]
    UnknownProject { identity: String },
    #[error(
        "Branch '{branch}' is not configured for project '{project}'. Available branches: {}",
        available.join(", ")
    )]
    UnknownBranch {
        project: String,
        branch: String,
        available: Vec<String>,
    },
}

/// 配置文件加载错误
#[derive(Debug, Error)]
pub enum RegistryLoadError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 规范化仓库标识：去掉末尾 `/` 和一个 `.git` 后缀
fn normalize_identity(identity: &str) -> &str {
    let identity = identity.trim_end_matches('/');
    identity.strip_suffix(".git").unwrap_or(identity)
}

/// 项目注册表
///
/// 加载后只读；key 为规范化后的仓库标识
pub struct ProjectRegistry {
    projects: HashMap<String, ProjectConfig>,
}

impl ProjectRegistry {
    /// 从已反序列化的配置文档构建注册表
    pub fn from_document(doc: HashMap<String, ProjectConfig>) -> Self {
        let mut projects: HashMap<String, ProjectConfig> = HashMap::new();
        let mut seen_names: Vec<String> = Vec::new();

        for (identity, project) in doc {
            let key = normalize_identity(&identity).to_string();

            if seen_names.contains(&project.name) {
                warn!(
                    project = %project.name,
                    "Duplicate project display name in config; name-based lookup will pick one arbitrarily"
                );
            }
            seen_names.push(project.name.clone());

            for (branch, environment) in &project.environments {
                if environment.commands.is_empty() {
                    warn!(
                        project = %project.name,
                        branch = %branch,
                        "Environment has an empty command list; deployments will be no-ops"
                    );
                }
            }

            if projects.insert(key.clone(), project).is_some() {
                warn!(repository = %key, "Duplicate repository identity in config after normalization");
            }
        }

        Self { projects }
    }

    /// 从文件加载注册表
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, RegistryLoadError> {
        let content = std::fs::read_to_string(path)?;
        let doc: HashMap<String, ProjectConfig> = serde_json::from_str(&content)?;
        Ok(Self::from_document(doc))
    }

    /// 按仓库标识查找项目（URL 或名称，自动去掉 `.git`）
    pub fn resolve_by_repository(&self, identity: &str) -> Option<(&str, &ProjectConfig)> {
        let key = normalize_identity(identity);
        self.projects
            .get_key_value(key)
            .map(|(k, v)| (k.as_str(), v))
    }

    /// 按显示名称查找项目（手动触发使用）
    pub fn resolve_by_name(&self, name: &str) -> Option<(&str, &ProjectConfig)> {
        self.projects
            .iter()
            .find(|(_, project)| project.name == name)
            .map(|(k, v)| (k.as_str(), v))
    }

    /// 一步解析 (仓库标识, 分支) → (项目, 环境)
    ///
    /// 队列 worker 出队后重新解析时使用
    pub fn resolve_environment(
        &self,
        identity: &str,
        branch: &str,
    ) -> Result<(&ProjectConfig, &EnvironmentConfig), ResolutionError> {
        let (_, project) =
            self.resolve_by_repository(identity)
                .ok_or_else(|| ResolutionError::UnknownProject {
                    identity: identity.to_string(),
                })?;

        let environment =
            project
                .environment(branch)
                .ok_or_else(|| ResolutionError::UnknownBranch {
                    project: project.name.clone(),
                    branch: branch.to_string(),
                    available: project.available_branches(),
                })?;

        Ok((project, environment))
    }

    /// 所有项目的显示名称
    pub fn project_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.projects.values().map(|p| p.name.clone()).collect();
        names.sort();
        names
    }

    /// 项目数量
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
