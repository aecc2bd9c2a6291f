//! 服务模块
//!
//! 部署编排逻辑

pub mod coordinator;

pub use coordinator::{DeployCoordinator, SharedRegistry};
