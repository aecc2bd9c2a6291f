//! 环境变量配置加载

use std::env;
use tracing::warn;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 服务监听端口
    pub port: u16,
    /// 项目配置文件路径
    pub config_path: String,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        // Port
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        // Config path - 支持旧名称兼容
        let config_path = load_with_fallback("CONFIG_PATH", "DEPLOY_CONFIG_PATH")
            .unwrap_or_else(|| "./config.json".to_string());
        if env::var("DEPLOY_CONFIG_PATH").is_ok() {
            warn!("Deprecated environment variable DEPLOY_CONFIG_PATH detected. Please use CONFIG_PATH");
        }

        Self { port, config_path }
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 常量
pub mod constants {
    /// 通知发送超时（秒）
    pub const NOTIFY_TIMEOUT_SECS: u64 = 10;

    /// 手动触发时的默认操作者名称
    pub const DEFAULT_TRIGGER_ACTOR: &str = "Manual Trigger";

    /// git pull 输出中表示"没有变更"的标记
    pub const UP_TO_DATE_MARKER: &str = "Already up to date.";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        // 设置测试环境变量
        env::set_var("TEST_ENV_PRIMARY", "primary_value");
        env::set_var("TEST_ENV_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("TEST_ENV_PRIMARY", "TEST_ENV_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("TEST_ENV_PRIMARY");
        assert_eq!(
            load_with_fallback("TEST_ENV_PRIMARY", "TEST_ENV_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("TEST_ENV_FALLBACK");
        assert_eq!(load_with_fallback("TEST_ENV_PRIMARY", "TEST_ENV_FALLBACK"), None);
    }
}
