//! 校验和与随机数工具
//!
//! 登录 Token 与 broker HTTP 签名共用这里的带密钥哈希：
//! 先写入密钥，再按顺序写入各字段，输出大写十六进制摘要。

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::Context as Md5Context;
use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Nonce 字节长度
pub const NONCE_BYTES: usize = 32;

/// 使用密钥计算 SHA256 摘要
pub fn checksum_sha256_with_key(key: &[u8], fields: &[&[u8]]) -> String {
    let mut h = Sha256::new();
    h.update(key);
    for field in fields {
        h.update(field);
    }
    hex::encode_upper(h.finalize())
}

/// 使用密钥计算 SHA1 摘要
pub fn checksum_sha1_with_key(key: &[u8], fields: &[&[u8]]) -> String {
    let mut h = Sha1::new();
    h.update(key);
    for field in fields {
        h.update(field);
    }
    hex::encode_upper(h.finalize())
}

/// 使用密钥计算 MD5 摘要
pub fn checksum_md5_with_key(key: &[u8], fields: &[&[u8]]) -> String {
    let mut ctx = Md5Context::new();
    ctx.consume(key);
    for field in fields {
        ctx.consume(field);
    }
    hex::encode_upper(ctx.compute().0)
}

/// 计算 MD5 摘要（不带密钥）
pub fn checksum_md5(fields: &[&[u8]]) -> String {
    let mut ctx = Md5Context::new();
    for field in fields {
        ctx.consume(field);
    }
    hex::encode_upper(ctx.compute().0)
}

/// 新建 Nonce：32 随机字节，标准 base64 编码
pub fn new_nonce() -> String {
    let bytes: [u8; NONCE_BYTES] = rand::random();
    STANDARD.encode(bytes)
}

/// 当前 Unix 时间戳（单位秒）
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_checksum_is_deterministic() {
        let a = checksum_sha256_with_key(b"secret", &[b"tag", b"app", b"name"]);
        let b = checksum_sha256_with_key(b"secret", &[b"tag", b"app", b"name"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, a.to_uppercase());
    }

    #[test]
    fn changing_any_field_changes_checksum() {
        let base = checksum_sha256_with_key(b"secret", &[b"tag", b"app"]);
        assert_ne!(base, checksum_sha256_with_key(b"secret2", &[b"tag", b"app"]));
        assert_ne!(base, checksum_sha256_with_key(b"secret", &[b"tag2", b"app"]));
        assert_ne!(base, checksum_sha256_with_key(b"secret", &[b"tag", b"app2"]));
    }

    #[test]
    fn field_concatenation_matches_single_buffer() {
        // 分字段写入与一次性写入同一串字节等价
        let joined = checksum_md5(&[b"foobar"]);
        let split = checksum_md5(&[b"foo", b"bar"]);
        assert_eq!(joined, split);
    }

    #[test]
    fn sha1_variant_has_expected_width() {
        let sum = checksum_sha1_with_key(b"k", &[b"v"]);
        assert_eq!(sum.len(), 40);
    }

    #[test]
    fn nonce_is_unique_and_decodable() {
        let a = new_nonce();
        let b = new_nonce();
        assert_ne!(a, b);
        let raw = STANDARD.decode(&a).expect("nonce must be base64");
        assert_eq!(raw.len(), NONCE_BYTES);
    }
}
