//! 部署协调器
//!
//! 全局 FIFO 队列 + 单 worker 状态机（Idle ⇄ Processing）。
//! 队列和 processing 标志是系统中唯一的可变共享状态，
//! 全部收在一把 Mutex 后面

use chrono::Utc;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::env::constants::UP_TO_DATE_MARKER;
use crate::config::project::{EnvironmentConfig, ProjectRegistry, ResolutionError};
use crate::domain::deploy::{
    CommandErrorKind, DeployJob, DeploymentOutcome, FailedCommand, JobTrigger, StatusTier,
};
use crate::infra::command::CommandRunner;
use crate::infra::notifier::{Notifier, StatusMessage};

/// 共享注册表句柄（重载配置时整体替换）
pub type SharedRegistry = Arc<RwLock<ProjectRegistry>>;

/// 排队中的任务及其在途的排队通知
///
/// 排队通知在后台投递，worker 取出任务后先等它送达，
/// 保证同一任务的 Queued 消息先于 Started 消息
struct QueuedEntry {
    job: DeployJob,
    queued_notice: Option<tokio::task::JoinHandle<()>>,
}

/// 队列与 worker 状态
///
/// 不变式：`processing == false` 时队列必为空
struct CoordinatorInner {
    queue: VecDeque<QueuedEntry>,
    processing: bool,
}

/// 部署协调器
pub struct DeployCoordinator {
    inner: Mutex<CoordinatorInner>,
    registry: SharedRegistry,
    notifier: Notifier,
}

impl DeployCoordinator {
    /// 创建新的协调器
    pub fn new(registry: SharedRegistry, notifier: Notifier) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CoordinatorInner {
                queue: VecDeque::new(),
                processing: false,
            }),
            registry,
            notifier,
        })
    }

    /// 入队一个部署任务，返回 1-based 队列位置
    ///
    /// 解析失败时同步返回错误，任务不入队（HTTP 边界转 400）。
    /// worker 空闲时由本次调用启动 drain；否则排队通知交给后台任务投递，
    /// 本方法不等投递完成就返回
    pub async fn enqueue(self: &Arc<Self>, job: DeployJob) -> Result<usize, ResolutionError> {
        // 入队前解析一次，拒绝无法定位的任务
        let (project_name, notify_url) = {
            let registry = self.registry.read().await;
            let (project, environment) =
                registry.resolve_environment(&job.project_key, &job.branch)?;
            (project.name.clone(), environment.notify_url.clone())
        };

        let branch = job.branch.clone();
        let (position, started_worker) = {
            let mut inner = self.inner.lock().await;
            let queued_notice = if inner.processing {
                // worker 已在运行，告知排队情况；投递放到请求路径之外
                let jobs_ahead = inner.queue.len() + usize::from(inner.processing);
                let message = StatusMessage::new(
                    format!("{} Deployment Queued", project_name),
                    StatusTier::Queued,
                )
                .with_text(format!("{} deployment(s) ahead in the queue", jobs_ahead))
                .field("Project", &project_name)
                .field("Branch", &job.branch)
                .field("Triggered By", &job.triggered_by)
                .field("Queued At", job.enqueued_at.to_rfc3339());
                let notifier = self.notifier.clone();
                let endpoint = notify_url.clone();
                Some(tokio::spawn(async move {
                    notifier.notify(endpoint.as_deref(), &message).await;
                }))
            } else {
                None
            };

            let started_worker = !inner.processing;
            inner.processing = true;
            inner.queue.push_back(QueuedEntry { job, queued_notice });
            (inner.queue.len(), started_worker)
        };

        info!(
            project = %project_name,
            branch = %branch,
            position = position,
            "Deployment enqueued"
        );

        if started_worker {
            let coordinator = self.clone();
            tokio::spawn(async move {
                coordinator.drain().await;
            });
        }

        Ok(position)
    }

    /// worker 主循环：逐个取出队头任务执行，队列清空后回到 Idle
    async fn drain(self: Arc<Self>) {
        loop {
            let entry = {
                let mut inner = self.inner.lock().await;
                match inner.queue.pop_front() {
                    Some(entry) => entry,
                    None => {
                        inner.processing = false;
                        info!("Deploy queue drained, worker idle");
                        return;
                    }
                }
            };

            // 排队通知若还在途，先等它送达再发本任务的 Started
            if let Some(notice) = entry.queued_notice {
                let _ = notice.await;
            }

            self.run_job(entry.job).await;
        }
    }

    /// 执行单个任务（失败只影响本任务，不影响后续队列）
    async fn run_job(&self, job: DeployJob) {
        // 出队后重新解析：配置可能在排队期间被重载
        let (project_name, environment) = {
            let registry = self.registry.read().await;
            match registry.resolve_environment(&job.project_key, &job.branch) {
                Ok((project, environment)) => (project.name.clone(), environment.clone()),
                Err(e) => {
                    warn!(
                        project = %job.project_key,
                        branch = %job.branch,
                        error = %e,
                        "Job no longer resolvable after dequeue, discarding"
                    );
                    return;
                }
            }
        };

        let outcome = self.run_deployment(&job, &project_name, &environment).await;

        if outcome.success {
            info!(
                project = %project_name,
                branch = %job.branch,
                elapsed_secs = outcome.elapsed.as_secs(),
                short_circuited = outcome.short_circuited,
                "Deployment finished"
            );
        } else {
            warn!(
                project = %project_name,
                branch = %job.branch,
                elapsed_secs = outcome.elapsed.as_secs(),
                "Deployment failed"
            );
        }
    }

    /// 按环境配置顺序执行命令并发送生命周期通知
    async fn run_deployment(
        &self,
        job: &DeployJob,
        project_name: &str,
        environment: &EnvironmentConfig,
    ) -> DeploymentOutcome {
        let started = Instant::now();
        let notify_url = environment.notify_url.as_deref();
        let verbose = environment
            .log_settings
            .as_ref()
            .map_or(false, |settings| settings.verbose);
        let work_dir = Path::new(&environment.deploy_path);

        let mut start_message = StatusMessage::new(
            format!("{} Deployment Started", project_name),
            StatusTier::InProgress,
        )
        .with_text(job.commit_message.clone().unwrap_or_default())
        .field("Project", project_name)
        .field("Branch", &job.branch)
        .field("Triggered By", &job.triggered_by)
        .field("Started At", Utc::now().to_rfc3339());
        if matches!(job.trigger, JobTrigger::Push { forced: true }) {
            start_message = start_message.field("Force Push", "true");
        }
        self.notifier.notify(notify_url, &start_message).await;

        let mut failed: Option<FailedCommand> = None;
        let mut short_circuited = false;

        for (index, command) in environment.commands.iter().enumerate() {
            info!(
                project = %project_name,
                command = %command,
                work_dir = %environment.deploy_path,
                "Executing deploy command"
            );

            let result = CommandRunner::execute(command, work_dir).await;

            if verbose {
                info!(
                    project = %project_name,
                    command = %command,
                    stdout = %result.stdout.trim(),
                    stderr = %result.stderr.trim(),
                    "Command output"
                );
            }

            if !result.success {
                let kind = result.error.unwrap_or(CommandErrorKind::Ordinary);
                let remediation = match kind {
                    CommandErrorKind::PermissionDenied => {
                        "The operating system denied the command. Run the agent with \
                         elevated privileges or fix permissions on the deploy path."
                    }
                    CommandErrorKind::Ordinary => "Check the command output below.",
                };

                let message = StatusMessage::new(
                    format!("{} Command Failed", project_name),
                    StatusTier::Failure,
                )
                .with_text(format!("{}\n```{}```", remediation, result.failure_detail()))
                .field("Project", project_name)
                .field("Branch", &job.branch)
                .field("Command", command)
                .field("Working Directory", &environment.deploy_path)
                .field("Triggered By", &job.triggered_by);
                self.notifier.notify(notify_url, &message).await;

                failed = Some(FailedCommand {
                    command: command.clone(),
                    result,
                });
                // 放弃本任务余下命令，队列中的下一个任务不受影响
                break;
            }

            // push 触发的任务：首条命令（pull）输出表明没有变更时跳过后续构建。
            // 这是对 pull 输出的检查，不是独立的执行路径
            if index == 0 && job.trigger.is_push() && result.stdout.contains(UP_TO_DATE_MARKER) {
                info!(
                    project = %project_name,
                    branch = %job.branch,
                    "Pull reported no changes, skipping remaining commands"
                );
                short_circuited = true;
                break;
            }
        }

        let elapsed = started.elapsed();

        if failed.is_none() {
            let text = if short_circuited {
                "Already up to date, nothing to deploy".to_string()
            } else {
                format!("All {} command(s) completed", environment.commands.len())
            };
            let message = StatusMessage::new(
                format!("{} Deployment Completed", project_name),
                StatusTier::Success,
            )
            .with_text(text)
            .field("Project", project_name)
            .field("Branch", &job.branch)
            .field("Triggered By", &job.triggered_by)
            .field("Duration", format!("{}s", elapsed.as_secs()));
            self.notifier.notify(notify_url, &message).await;
        }

        DeploymentOutcome {
            success: failed.is_none(),
            failed,
            elapsed,
            short_circuited,
        }
    }

    /// 当前排队任务数（不含执行中的任务）
    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// worker 是否空闲
    pub async fn is_idle(&self) -> bool {
        let inner = self.inner.lock().await;
        !inner.processing && inner.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::project::ProjectConfig;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    /// 为测试搭一个单项目注册表，每个 (branch, commands) 生成一个环境
    fn registry_with(deploy_path: &Path, branches: &[(&str, &[&str])]) -> SharedRegistry {
        registry_with_notify(deploy_path, None, branches)
    }

    fn registry_with_notify(
        deploy_path: &Path,
        notify_url: Option<&str>,
        branches: &[(&str, &[&str])],
    ) -> SharedRegistry {
        let mut environments = serde_json::Map::new();
        for (branch, commands) in branches {
            let mut env = serde_json::json!({
                "deployPath": deploy_path.to_str().unwrap(),
                "commands": commands,
            });
            if let Some(url) = notify_url {
                env["notifyUrl"] = serde_json::json!(url);
            }
            environments.insert(branch.to_string(), env);
        }
        let doc = serde_json::json!({
            "https://example.com/org/demo": {
                "name": "demo",
                "secret": "s",
                "environments": environments,
            }
        });
        let parsed: HashMap<String, ProjectConfig> = serde_json::from_value(doc).unwrap();
        Arc::new(RwLock::new(ProjectRegistry::from_document(parsed)))
    }

    /// 本地 HTTP 端点：收下每个 POST 的请求体并回 200
    async fn notify_sink() -> (String, Arc<std::sync::Mutex<Vec<String>>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bodies = Arc::new(std::sync::Mutex::new(Vec::new()));

        let captured = bodies.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let captured = captured.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    loop {
                        let n = match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);

                        let text = String::from_utf8_lossy(&buf).to_string();
                        let Some(header_end) = text.find("\r\n\r\n") else {
                            continue;
                        };
                        let content_length = text
                            .lines()
                            .find_map(|line| {
                                let line = line.to_ascii_lowercase();
                                let value = line.strip_prefix("content-length:")?;
                                value.trim().parse::<usize>().ok()
                            })
                            .unwrap_or(0);
                        let body_start = header_end + 4;
                        if buf.len() < body_start + content_length {
                            continue;
                        }

                        let body = String::from_utf8_lossy(
                            &buf[body_start..body_start + content_length],
                        )
                        .to_string();
                        captured.lock().unwrap().push(body);
                        let _ = stream
                            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                            .await;
                        buf.clear();
                    }
                });
            }
        });

        (format!("http://{}", addr), bodies)
    }

    /// 本地 HTTP 端点：接收请求但永不回复，用于模拟挂起的通知端点
    async fn stalled_sink() -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut chunk = [0u8; 4096];
                    while let Ok(n) = stream.read(&mut chunk).await {
                        if n == 0 {
                            return;
                        }
                    }
                });
            }
        });
        format!("http://{}", addr)
    }

    fn test_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("coordinator-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn wait_until_idle(coordinator: &Arc<DeployCoordinator>) {
        for _ in 0..500 {
            if coordinator.is_idle().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("coordinator did not become idle in time");
    }

    fn manual_job(branch: &str) -> DeployJob {
        DeployJob::new(
            "https://example.com/org/demo",
            branch,
            "tester",
            JobTrigger::Manual,
        )
    }

    #[tokio::test]
    async fn test_jobs_execute_in_enqueue_order() {
        let dir = test_dir();
        let registry = registry_with(
            &dir,
            &[
                ("b1", &["echo one >> order.log"][..]),
                ("b2", &["echo two >> order.log"][..]),
                ("b3", &["echo three >> order.log"][..]),
            ],
        );
        let coordinator = DeployCoordinator::new(registry, Notifier::new());

        assert_eq!(coordinator.enqueue(manual_job("b1")).await.unwrap(), 1);
        coordinator.enqueue(manual_job("b2")).await.unwrap();
        coordinator.enqueue(manual_job("b3")).await.unwrap();

        wait_until_idle(&coordinator).await;

        let log = std::fs::read_to_string(dir.join("order.log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_job() {
        let dir = test_dir();
        let registry = registry_with(
            &dir,
            &[
                ("bad", &["exit 1", "echo never >> iso.log"][..]),
                ("good", &["echo ran >> iso.log"][..]),
            ],
        );
        let coordinator = DeployCoordinator::new(registry, Notifier::new());

        coordinator.enqueue(manual_job("bad")).await.unwrap();
        coordinator.enqueue(manual_job("good")).await.unwrap();

        wait_until_idle(&coordinator).await;

        // 失败任务的后续命令被放弃，但下一个任务完整执行
        let log = std::fs::read_to_string(dir.join("iso.log")).unwrap();
        assert_eq!(log.lines().collect::<Vec<_>>(), vec!["ran"]);
    }

    #[tokio::test]
    async fn test_push_job_short_circuits_on_up_to_date() {
        let dir = test_dir();
        let registry = registry_with(
            &dir,
            &[(
                "main",
                &["echo Already up to date.", "echo built >> sc.log"][..],
            )],
        );
        let coordinator = DeployCoordinator::new(registry, Notifier::new());

        let job = DeployJob::new(
            "https://example.com/org/demo",
            "main",
            "pusher",
            JobTrigger::Push { forced: false },
        );
        coordinator.enqueue(job).await.unwrap();
        wait_until_idle(&coordinator).await;

        assert!(!dir.join("sc.log").exists());
    }

    #[tokio::test]
    async fn test_manual_job_never_short_circuits() {
        let dir = test_dir();
        let registry = registry_with(
            &dir,
            &[(
                "main",
                &["echo Already up to date.", "echo built >> sc.log"][..],
            )],
        );
        let coordinator = DeployCoordinator::new(registry, Notifier::new());

        coordinator.enqueue(manual_job("main")).await.unwrap();
        wait_until_idle(&coordinator).await;

        let log = std::fs::read_to_string(dir.join("sc.log")).unwrap();
        assert!(log.contains("built"));
    }

    #[tokio::test]
    async fn test_push_job_with_changes_runs_build() {
        let dir = test_dir();
        let registry = registry_with(
            &dir,
            &[(
                "main",
                &["echo Updating abc123..def456", "echo built >> sc.log"][..],
            )],
        );
        let coordinator = DeployCoordinator::new(registry, Notifier::new());

        let job = DeployJob::new(
            "https://example.com/org/demo",
            "main",
            "pusher",
            JobTrigger::Push { forced: false },
        );
        coordinator.enqueue(job).await.unwrap();
        wait_until_idle(&coordinator).await;

        let log = std::fs::read_to_string(dir.join("sc.log")).unwrap();
        assert!(log.contains("built"));
    }

    #[tokio::test]
    async fn test_unresolvable_job_is_rejected_synchronously() {
        let dir = test_dir();
        let registry = registry_with(&dir, &[("main", &["echo hi"][..])]);
        let coordinator = DeployCoordinator::new(registry, Notifier::new());

        let err = coordinator
            .enqueue(manual_job("feature-x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("main"));

        // 没有任务入队，worker 保持空闲
        assert_eq!(coordinator.queue_len().await, 0);
        assert!(coordinator.is_idle().await);
    }

    #[tokio::test]
    async fn test_enqueue_returns_before_notification_delivery() {
        let dir = test_dir();
        let endpoint = stalled_sink().await;
        let registry = registry_with_notify(
            &dir,
            Some(&endpoint),
            &[
                ("b-slow", &["sleep 1"][..]),
                ("b-fast", &["echo done"][..]),
            ],
        );
        let coordinator = DeployCoordinator::new(registry, Notifier::new());

        coordinator.enqueue(manual_job("b-slow")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // worker 忙、端点挂起：入队仍需立刻返回
        let started = Instant::now();
        coordinator.enqueue(manual_job("b-fast")).await.unwrap();
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "enqueue must not wait for notification delivery"
        );
    }

    #[tokio::test]
    async fn test_queued_notification_precedes_started_for_waiting_job() {
        let dir = test_dir();
        let (endpoint, bodies) = notify_sink().await;
        let registry = registry_with_notify(
            &dir,
            Some(&endpoint),
            &[
                ("b-slow", &["sleep 1"][..]),
                ("b-fast", &["echo done"][..]),
            ],
        );
        let coordinator = DeployCoordinator::new(registry, Notifier::new());

        coordinator.enqueue(manual_job("b-slow")).await.unwrap();
        // 等 worker 取走第一个任务，确保第二个任务入队时队列为空
        tokio::time::sleep(Duration::from_millis(200)).await;
        coordinator.enqueue(manual_job("b-fast")).await.unwrap();

        wait_until_idle(&coordinator).await;

        let bodies = bodies.lock().unwrap().clone();
        let queued = bodies
            .iter()
            .position(|b| b.contains("Deployment Queued") && b.contains("b-fast"))
            .expect("queued notification was not delivered");
        let started = bodies
            .iter()
            .position(|b| b.contains("Deployment Started") && b.contains("b-fast"))
            .expect("started notification was not delivered");
        assert!(queued < started, "queued message must precede started");
        assert!(bodies[queued].contains("1 deployment(s) ahead"));
        assert!(bodies[queued].contains("tester"));
    }
}
