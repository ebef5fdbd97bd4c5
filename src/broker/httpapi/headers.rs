//! broker HTTP 签名头
//!
//! 发布方把信令封装进请求头（负载走请求体），订阅方校验签名与重放窗口。
//! 校验字串：`SHA256(key ‖ tag ‖ appid ‖ name ‖ data ‖ payloadmd5 ‖ nonce ‖ timestamp)`。

use axum::http::HeaderMap;

use crate::error::{GatewayError, Result};
use crate::protocol::Command;
use crate::tenant::AppDirectory;
use crate::util;

/// AppID
pub const HEADER_APP_ID: &str = "Zim-Appid";
/// 信令名
pub const HEADER_NAME: &str = "Zim-Name";
/// 信令数据
pub const HEADER_DATA: &str = "Zim-Data";
/// 负载 MD5 值
pub const HEADER_PAYLOAD_MD5: &str = "Zim-Payloadmd5";
/// Nonce
pub const HEADER_NONCE: &str = "Zim-Nonce";
/// Unix 时间戳
pub const HEADER_TIMESTAMP: &str = "Zim-Timestamp";
/// 校验和
pub const HEADER_CHECKSUM: &str = "Zim-Checksum";

/// 为待发布的信令生成签名请求头
pub fn sign(
    apps: &AppDirectory,
    tag: &str,
    cmd: &Command,
) -> Result<Vec<(&'static str, String)>> {
    let app = apps.get(&cmd.app_id).ok_or_else(|| {
        GatewayError::InvalidParameter(format!("no app {}", cmd.app_id))
    })?;

    let payload_md5 = util::checksum_md5(&[&cmd.payload]);
    let data = match &cmd.data {
        Some(data) => data.to_json()?,
        None => String::new(),
    };
    let nonce = util::new_nonce();
    let timestamp = util::unix_now().to_string();
    let checksum = app.checksum_sha256(&[
        tag.as_bytes(),
        cmd.app_id.as_bytes(),
        cmd.name.as_bytes(),
        data.as_bytes(),
        payload_md5.as_bytes(),
        nonce.as_bytes(),
        timestamp.as_bytes(),
    ]);

    let mut headers = vec![
        (HEADER_APP_ID, cmd.app_id.clone()),
        (HEADER_NAME, cmd.name.clone()),
        (HEADER_PAYLOAD_MD5, payload_md5),
        (HEADER_NONCE, nonce),
        (HEADER_TIMESTAMP, timestamp),
        (HEADER_CHECKSUM, checksum),
    ];
    if !data.is_empty() {
        headers.push((HEADER_DATA, data));
    }
    Ok(headers)
}

/// 校验签名请求头并还原信令
///
/// `timestamp + window < now` 的请求按重放拒绝。
pub fn verify(
    apps: &AppDirectory,
    tag: &str,
    headers: &HeaderMap,
    payload: &[u8],
    window_secs: i64,
    now: i64,
) -> Result<Command> {
    let app_id = required(headers, HEADER_APP_ID)?;
    let name = required(headers, HEADER_NAME)?;
    let data = optional(headers, HEADER_DATA);
    let payload_md5 = required(headers, HEADER_PAYLOAD_MD5)?;
    let nonce = required(headers, HEADER_NONCE)?;
    let timestamp = required(headers, HEADER_TIMESTAMP)?;
    let checksum = required(headers, HEADER_CHECKSUM)?;

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| GatewayError::InvalidParameter(format!("bad timestamp {timestamp}")))?;
    if ts + window_secs < now {
        return Err(GatewayError::InvalidParameter("request expired".to_string()));
    }

    let app = apps
        .get(&app_id)
        .ok_or_else(|| GatewayError::InvalidParameter(format!("no app {app_id}")))?;

    let expect_checksum = app.checksum_sha256(&[
        tag.as_bytes(),
        app_id.as_bytes(),
        name.as_bytes(),
        data.as_bytes(),
        payload_md5.as_bytes(),
        nonce.as_bytes(),
        timestamp.as_bytes(),
    ]);
    if expect_checksum != checksum {
        return Err(GatewayError::InvalidParameter("checksum mismatch".to_string()));
    }

    let expect_payload_md5 = util::checksum_md5(&[payload]);
    if payload_md5.to_uppercase() != expect_payload_md5 {
        return Err(GatewayError::InvalidParameter("payload md5 mismatch".to_string()));
    }

    let mut cmd = Command {
        version: String::new(),
        app_id,
        name,
        data: None,
        payload: payload.to_vec(),
    };
    cmd.parse_data(data.as_bytes())
        .map_err(|err| GatewayError::InvalidParameter(format!("bad data: {err}")))?;
    Ok(cmd)
}

fn required(headers: &HeaderMap, name: &str) -> Result<String> {
    match optional(headers, name) {
        value if value.is_empty() => {
            Err(GatewayError::InvalidParameter(format!("miss header {name}")))
        }
        value => Ok(value),
    }
}

fn optional(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
