//! 命令执行器
//!
//! 在目标目录执行单条 shell 命令并捕获输出：
//! - 默认平台：`sh -c`，`current_dir` 指向工作目录
//! - Windows：按顺序尝试提权策略（Start-Process -Verb RunAs → sudo），
//!   全部失败后降级为普通执行

use std::path::Path;
use tokio::process::Command;

use crate::domain::deploy::{CommandErrorKind, CommandResult};

/// 命令执行器
pub struct CommandRunner;

impl CommandRunner {
    /// 执行一条命令，返回捕获的输出和分类结果
    ///
    /// 同一任务的命令由 worker 顺序 await，不会并发执行
    pub async fn execute(command: &str, work_dir: &Path) -> CommandResult {
        #[cfg(windows)]
        {
            for strategy in elevation::STRATEGIES {
                match strategy.attempt(command, work_dir).await {
                    Ok(result) => return result,
                    Err(e) => {
                        tracing::warn!(
                            strategy = strategy.name(),
                            error = %e,
                            "Elevated execution unavailable, trying next strategy"
                        );
                    }
                }
            }
            tracing::warn!("All elevation strategies failed, falling back to unelevated run");
        }

        Self::run_unelevated(command, work_dir).await
    }

    /// 普通（非提权）执行
    async fn run_unelevated(command: &str, work_dir: &Path) -> CommandResult {
        match shell_command(command).current_dir(work_dir).output().await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

                if output.status.success() {
                    CommandResult::ok(stdout, stderr)
                } else {
                    let kind = classify_failure(&stderr);
                    CommandResult::failed(stdout, stderr, kind)
                }
            }
            Err(e) => {
                // 启动失败（目录不存在、shell 缺失等）
                let detail = e.to_string();
                let kind = classify_failure(&detail);
                CommandResult::failed(String::new(), detail, kind)
            }
        }
    }
}

/// 构造平台对应的 shell 调用
fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// 失败文本中的权限标记
const PERMISSION_MARKERS: &[&str] = &[
    "access is denied",
    "eperm",
    "eacces",
    "permission denied",
    "operation not permitted",
    "requires elevated privileges",
];

/// 根据失败文本分类错误
///
/// 仅影响通知中的提示文案，不改变控制流
pub fn classify_failure(detail: &str) -> CommandErrorKind {
    let lowered = detail.to_lowercase();
    if PERMISSION_MARKERS.iter().any(|m| lowered.contains(m)) {
        CommandErrorKind::PermissionDenied
    } else {
        CommandErrorKind::Ordinary
    }
}

/// Windows 提权策略链
#[cfg(windows)]
mod elevation {
    use std::path::{Path, PathBuf};
    use thiserror::Error;
    use tokio::process::Command;

    use super::classify_failure;
    use crate::domain::deploy::CommandResult;

    /// 提权执行失败（策略本身不可用，与命令失败区分开）
    #[derive(Debug, Error)]
    pub enum ElevationError {
        #[error("Failed to stage elevation script: {0}")]
        Stage(std::io::Error),
        #[error("Failed to launch elevated process: {0}")]
        Launch(std::io::Error),
        #[error("Elevation launcher rejected the request: {0}")]
        Declined(String),
    }

    /// 按顺序尝试的策略列表
    pub const STRATEGIES: &[Strategy] = &[Strategy::PowerShellRunAs, Strategy::WindowsSudo];

    /// 提权策略
    #[derive(Clone, Copy, Debug)]
    pub enum Strategy {
        /// PowerShell `Start-Process -Verb RunAs`（UAC 弹窗）
        PowerShellRunAs,
        /// Windows 11 内置 `sudo`
        WindowsSudo,
    }

    /// 暂存文件守卫：无论哪条路径退出都删除
    struct StagedArtifacts {
        paths: Vec<PathBuf>,
    }

    impl StagedArtifacts {
        fn new() -> Self {
            Self { paths: Vec::new() }
        }

        fn stage(&mut self, name: String) -> PathBuf {
            let path = std::env::temp_dir().join(name);
            self.paths.push(path.clone());
            path
        }
    }

    impl Drop for StagedArtifacts {
        fn drop(&mut self) {
            for path in &self.paths {
                let _ = std::fs::remove_file(path);
            }
        }
    }

    impl Strategy {
        pub fn name(&self) -> &'static str {
            match self {
                Strategy::PowerShellRunAs => "powershell_runas",
                Strategy::WindowsSudo => "windows_sudo",
            }
        }

        /// 尝试提权执行
        ///
        /// cd 与命令合并为一次调用，cd 失败与命令失败不可区分（已知限制）
        pub async fn attempt(
            &self,
            command: &str,
            work_dir: &Path,
        ) -> Result<CommandResult, ElevationError> {
            match self {
                Strategy::PowerShellRunAs => Self::attempt_runas(command, work_dir).await,
                Strategy::WindowsSudo => Self::attempt_sudo(command, work_dir).await,
            }
        }

        /// 通过暂存脚本 + Start-Process -Verb RunAs 执行
        ///
        /// 提权进程无法直接继承管道，输出与退出码写入暂存文件后回读
        async fn attempt_runas(
            command: &str,
            work_dir: &Path,
        ) -> Result<CommandResult, ElevationError> {
            let run_id = uuid::Uuid::new_v4();
            let mut artifacts = StagedArtifacts::new();

            let script_path = artifacts.stage(format!("deploy-{}.cmd", run_id));
            let stdout_path = artifacts.stage(format!("deploy-{}.out", run_id));
            let stderr_path = artifacts.stage(format!("deploy-{}.err", run_id));
            let code_path = artifacts.stage(format!("deploy-{}.code", run_id));

            let script = format!(
                "@echo off\r\ncd /d \"{}\" && {} 1> \"{}\" 2> \"{}\"\r\necho %errorlevel% > \"{}\"\r\n",
                work_dir.display(),
                command,
                stdout_path.display(),
                stderr_path.display(),
                code_path.display(),
            );
            tokio::fs::write(&script_path, script)
                .await
                .map_err(ElevationError::Stage)?;

            let launch = Command::new("powershell")
                .arg("-NoProfile")
                .arg("-Command")
                .arg(format!(
                    "Start-Process -FilePath cmd.exe -ArgumentList '/C','\"{}\"' -Verb RunAs -Wait",
                    script_path.display()
                ))
                .output()
                .await
                .map_err(ElevationError::Launch)?;

            if !launch.status.success() {
                // UAC 被拒绝或 Start-Process 失败
                return Err(ElevationError::Declined(
                    String::from_utf8_lossy(&launch.stderr).into_owned(),
                ));
            }

            let stdout = tokio::fs::read_to_string(&stdout_path)
                .await
                .unwrap_or_default();
            let stderr = tokio::fs::read_to_string(&stderr_path)
                .await
                .unwrap_or_default();
            let exit_code: i32 = tokio::fs::read_to_string(&code_path)
                .await
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(-1);

            if exit_code == 0 {
                Ok(CommandResult::ok(stdout, stderr))
            } else {
                let kind = classify_failure(&stderr);
                Ok(CommandResult::failed(stdout, stderr, kind))
            }
        }

        /// 通过内置 sudo 执行（inline 模式，输出可直接捕获）
        async fn attempt_sudo(
            command: &str,
            work_dir: &Path,
        ) -> Result<CommandResult, ElevationError> {
            let combined = format!("cd /d \"{}\" && {}", work_dir.display(), command);
            let output = Command::new("sudo")
                .arg("cmd")
                .arg("/C")
                .arg(&combined)
                .output()
                .await
                .map_err(ElevationError::Launch)?;

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

            if output.status.success() {
                Ok(CommandResult::ok(stdout, stderr))
            } else {
                let kind = classify_failure(&stderr);
                Ok(CommandResult::failed(stdout, stderr, kind))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let result = CommandRunner::execute("echo hello", &PathBuf::from("/tmp")).await;

        assert!(result.success);
        assert!(result.stdout.contains("hello"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_execute_runs_in_work_dir() {
        let result = CommandRunner::execute("pwd", &PathBuf::from("/tmp")).await;

        assert!(result.success);
        assert!(result.stdout.trim().ends_with("tmp"));
    }

    #[tokio::test]
    async fn test_failing_command_captures_stderr() {
        let result =
            CommandRunner::execute("echo boom >&2; exit 3", &PathBuf::from("/tmp")).await;

        assert!(!result.success);
        assert!(result.stderr.contains("boom"));
        assert_eq!(result.error, Some(CommandErrorKind::Ordinary));
    }

    #[tokio::test]
    async fn test_missing_work_dir_fails() {
        let result = CommandRunner::execute(
            "echo hi",
            &PathBuf::from("/nonexistent-dir-for-deploy-test"),
        )
        .await;

        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_classify_permission_markers() {
        assert_eq!(
            classify_failure("bash: /srv: Permission denied"),
            CommandErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_failure("Error: EACCES: permission denied, open '/etc/x'"),
            CommandErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_failure("Access is denied."),
            CommandErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_failure("this operation requires elevated privileges"),
            CommandErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_classify_ordinary_failure() {
        assert_eq!(
            classify_failure("make: *** No rule to make target 'build'"),
            CommandErrorKind::Ordinary
        );
        assert_eq!(classify_failure(""), CommandErrorKind::Ordinary);
    }
}
