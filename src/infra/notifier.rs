//! 通知发送
//!
//! 尽力而为地向外部 webhook 端点投递结构化状态消息，复用连接池。
//! 任何投递失败只记日志，绝不影响部署结果

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::env::constants::NOTIFY_TIMEOUT_SECS;
use crate::domain::deploy::StatusTier;

/// 结构化状态消息
#[derive(Clone, Debug)]
pub struct StatusMessage {
    /// 标题
    pub title: String,
    /// 正文
    pub text: String,
    /// 严重级别（决定颜色）
    pub tier: StatusTier,
    /// 标签字段（项目、分支、触发者等）
    pub fields: Vec<MessageField>,
}

/// 消息中的标签字段
#[derive(Clone, Debug, Serialize)]
pub struct MessageField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

impl StatusMessage {
    /// 创建新消息
    pub fn new(title: impl Into<String>, tier: StatusTier) -> Self {
        Self {
            title: title.into(),
            text: String::new(),
            tier,
            fields: Vec::new(),
        }
    }

    /// 设置正文
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// 追加标签字段
    pub fn field(mut self, title: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(MessageField {
            title: title.into(),
            value: value.into(),
            short: true,
        });
        self
    }
}

/// 出站消息体（attachment 格式）
#[derive(Serialize)]
struct NotifyPayload<'a> {
    attachments: [Attachment<'a>; 1],
}

#[derive(Serialize)]
struct Attachment<'a> {
    title: &'a str,
    text: &'a str,
    color: &'a str,
    fields: &'a [MessageField],
}

impl<'a> NotifyPayload<'a> {
    fn from_message(message: &'a StatusMessage) -> Self {
        Self {
            attachments: [Attachment {
                title: &message.title,
                text: &message.text,
                color: message.tier.color(),
                fields: &message.fields,
            }],
        }
    }
}

/// 通知客户端
#[derive(Clone)]
pub struct Notifier {
    client: Client,
}

impl Notifier {
    /// 创建新的通知客户端
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// 投递一条状态消息
    ///
    /// 端点缺失或非法、超时、网络错误、非 2xx 一律吞掉只记日志。
    /// 调用方 await 本方法以保证同一任务内的消息顺序
    pub async fn notify(&self, endpoint: Option<&str>, message: &StatusMessage) {
        let Some(endpoint) = endpoint else {
            debug!(title = %message.title, "No notify endpoint configured, skipping notification");
            return;
        };

        let url = match reqwest::Url::parse(endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => {
                warn!(endpoint = %endpoint, "Notify endpoint is not a valid http(s) URL, skipping notification");
                return;
            }
        };

        let payload = NotifyPayload::from_message(message);
        match self.client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(title = %message.title, "Notification delivered");
            }
            Ok(resp) => {
                warn!(
                    title = %message.title,
                    status = %resp.status(),
                    "Notification endpoint returned non-success status"
                );
            }
            Err(e) => {
                warn!(title = %message.title, error = %e, "Failed to deliver notification");
            }
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
