//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// 任务触发来源
#[derive(Clone, Debug, PartialEq)]
pub enum JobTrigger {
    /// 源码仓库 push 事件触发
    Push {
        /// 是否 force push
        forced: bool,
    },
    /// 手动触发（/deploy 或 /rebuild）
    Manual,
}

impl JobTrigger {
    /// 是否来自 push 事件
    pub fn is_push(&self) -> bool {
        matches!(self, JobTrigger::Push { .. })
    }
}

/// 队列中的部署任务
///
/// 入队后由队列独占持有，出队后由 worker 独占持有，
/// 执行结束（无论成败）即丢弃
#[derive(Clone, Debug)]
pub struct DeployJob {
    /// 规范化后的仓库标识（注册表 key）
    pub project_key: String,
    /// 目标分支
    pub branch: String,
    /// 触发者（缺省时为哨兵值）
    pub triggered_by: String,
    /// 提交信息（push 事件携带，用于通知展示）
    pub commit_message: Option<String>,
    /// 触发来源
    pub trigger: JobTrigger,
    /// 入队时间
    pub enqueued_at: DateTime<Utc>,
}

impl DeployJob {
    /// 创建新任务
    pub fn new(
        project_key: impl Into<String>,
        branch: impl Into<String>,
        triggered_by: impl Into<String>,
        trigger: JobTrigger,
    ) -> Self {
        Self {
            project_key: project_key.into(),
            branch: branch.into(),
            triggered_by: triggered_by.into(),
            commit_message: None,
            trigger,
            enqueued_at: Utc::now(),
        }
    }

    /// 附加提交信息
    pub fn with_commit_message(mut self, message: Option<String>) -> Self {
        self.commit_message = message;
        self
    }
}

/// 命令失败分类
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandErrorKind {
    /// 普通失败（非零退出码、启动失败等）
    Ordinary,
    /// 权限不足
    PermissionDenied,
}

/// 单条命令的执行结果
#[derive(Clone, Debug)]
pub struct CommandResult {
    /// 是否成功
    pub success: bool,
    /// 捕获的标准输出
    pub stdout: String,
    /// 捕获的标准错误
    pub stderr: String,
    /// 失败分类（仅失败时有值）
    pub error: Option<CommandErrorKind>,
}

impl CommandResult {
    /// 成功结果
    pub fn ok(stdout: String, stderr: String) -> Self {
        Self {
            success: true,
            stdout,
            stderr,
            error: None,
        }
    }

    /// 失败结果
    pub fn failed(stdout: String, stderr: String, kind: CommandErrorKind) -> Self {
        Self {
            success: false,
            stdout,
            stderr,
            error: Some(kind),
        }
    }

    /// 失败详情（优先 stderr，为空时回退 stdout）
    pub fn failure_detail(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// 第一条失败命令及其结果
#[derive(Clone, Debug)]
pub struct FailedCommand {
    /// 命令文本
    pub command: String,
    /// 执行结果
    pub result: CommandResult,
}

/// 一次完整部署的聚合结果
#[derive(Clone, Debug)]
pub struct DeploymentOutcome {
    /// 整体是否成功
    pub success: bool,
    /// 首条失败命令（失败时有值）
    pub failed: Option<FailedCommand>,
    /// 总耗时
    pub elapsed: Duration,
    /// 是否因"没有变更"而跳过了后续命令
    pub short_circuited: bool,
}

/// 通知严重级别（四档，对应消息颜色）
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StatusTier {
    InProgress,
    Success,
    Failure,
    Queued,
}

impl StatusTier {
    /// 对应的消息颜色
    pub fn color(&self) -> &'static str {
        match self {
            StatusTier::InProgress => "#FFA500",
            StatusTier::Success => "#7CD197",
            StatusTier::Failure => "#FF0000",
            StatusTier::Queued => "#6495ED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_push() {
        assert!(JobTrigger::Push { forced: false }.is_push());
        assert!(!JobTrigger::Manual.is_push());
    }

    #[test]
    fn test_failure_detail_prefers_stderr() {
        let result = CommandResult::failed(
            "out".to_string(),
            "err".to_string(),
            CommandErrorKind::Ordinary,
        );
        assert_eq!(result.failure_detail(), "err");

        let result = CommandResult::failed(
            "out".to_string(),
            "  ".to_string(),
            CommandErrorKind::Ordinary,
        );
        assert_eq!(result.failure_detail(), "out");
    }

    #[test]
    fn test_status_tier_colors() {
        assert_eq!(StatusTier::InProgress.color(), "#FFA500");
        assert_eq!(StatusTier::Success.color(), "#7CD197");
        assert_eq!(StatusTier::Failure.color(), "#FF0000");
        assert_eq!(StatusTier::Queued.color(), "#6495ED");
    }
}
