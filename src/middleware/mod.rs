//! 请求校验中间件

pub mod signature;

pub use signature::{verify_signature, SignatureError};
