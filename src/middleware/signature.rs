//! Webhook 签名校验
//!
//! 对请求原始 body 计算 HMAC-SHA256，与 `x-hub-signature-256` header
//! 中的 `sha256=<hex>` 做常量时间比较

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// 签名校验失败原因
///
/// 各原因在日志中区分，HTTP 边界统一返回 403
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("No webhook secret configured for this project")]
    MissingSecret,
    #[error("Missing signature header")]
    MissingHeader,
    #[error("Malformed signature header")]
    Malformed,
    #[error("Signature mismatch")]
    Mismatch,
}

/// 校验 webhook 签名
///
/// 无共享状态，可并发调用
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }

    let header = header.ok_or(SignatureError::MissingHeader)?;
    let hex_digest = header
        .strip_prefix("sha256=")
        .ok_or(SignatureError::Malformed)?;
    let provided = hex::decode(hex_digest).map_err(|_| SignatureError::Malformed)?;

    // HMAC 对任意长度密钥都有效，空密钥已在上面拒绝
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::MissingSecret)?;
    mac.update(body);

    // verify_slice 内部为常量时间比较
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

/// 计算签名 header 值（`sha256=<hex>`）
///
/// 供测试和出站签名使用
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "topsecret";
    const BODY: &[u8] = br#"{"ref":"refs/heads/main"}"#;

    #[test]
    fn test_valid_signature_accepted() {
        let header = sign(SECRET, BODY);
        assert_eq!(verify_signature(SECRET, BODY, Some(&header)), Ok(()));
    }

    #[test]
    fn test_mutated_body_rejected() {
        let header = sign(SECRET, BODY);
        let mut mutated = BODY.to_vec();
        mutated[0] ^= 0x01;
        assert_eq!(
            verify_signature(SECRET, &mutated, Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_mutated_signature_rejected() {
        let header = sign(SECRET, BODY);
        // 翻转 hex 部分的一个字符
        let mut chars: Vec<char> = header.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();

        assert_eq!(
            verify_signature(SECRET, BODY, Some(&tampered)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_missing_header_rejected() {
        assert_eq!(
            verify_signature(SECRET, BODY, None),
            Err(SignatureError::MissingHeader)
        );
    }

    #[test]
    fn test_missing_secret_rejected() {
        let header = sign(SECRET, BODY);
        assert_eq!(
            verify_signature("", BODY, Some(&header)),
            Err(SignatureError::MissingSecret)
        );
    }

    #[test]
    fn test_malformed_header_rejected() {
        assert_eq!(
            verify_signature(SECRET, BODY, Some("md5=abcdef")),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature(SECRET, BODY, Some("sha256=not-hex!")),
            Err(SignatureError::Malformed)
        );
    }
}
