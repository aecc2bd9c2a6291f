//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod deploy;

// Re-exports for convenience
pub use deploy::{
    CommandErrorKind, CommandResult, DeployJob, DeploymentOutcome, FailedCommand, JobTrigger,
    StatusTier,
};
