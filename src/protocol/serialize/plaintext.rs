//! 纯文本格式
//!
//! 用多行来分隔 Command 字段：
//! 第一行：信令版本（首字符为 `t`，后面是协议版本号）
//! 第二行：信令所属 App ID
//! 第三行：信令名
//! 第四行：信令数据（JSON，可为空行）
//! 第五行：信令负载

use bytes::BytesMut;

use crate::error::{GatewayError, Result};
use crate::protocol::Command;

use super::{ParseEngine, Serializer};

/// 版本
pub const VERSION: &str = "t1";
/// 协议探测字节
pub const PROBE_BYTE: u8 = b't';
/// 信令行数
pub const COMMAND_LINES: usize = 5;

/// 纯文本串行化描述
pub fn serializer() -> Serializer {
    Serializer {
        version: VERSION,
        probe_byte: PROBE_BYTE,
        new_engine: || Box::new(Engine),
        parse,
        compose,
    }
}

struct Engine;

impl ParseEngine for Engine {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Command>> {
        // 攒满五个 '\n' 才算一条完整报文
        let mut seen = 0usize;
        let mut end = None;
        for (idx, byte) in buf.iter().enumerate() {
            if *byte == b'\n' {
                seen += 1;
                if seen == COMMAND_LINES {
                    end = Some(idx);
                    break;
                }
            }
        }
        let Some(end) = end else {
            return Ok(None);
        };
        let frame = buf.split_to(end + 1);
        parse(&frame).map(Some)
    }
}

/// 一次性解析：负载为报文剩余部分（可含换行），首尾 `\r\n` 会被剥掉
pub fn parse(message: &[u8]) -> Result<Command> {
    if message.is_empty() || message[0] != PROBE_BYTE {
        return Err(GatewayError::UnsupportedProtocol);
    }
    let lines: Vec<&[u8]> = message.splitn(COMMAND_LINES, |b| *b == b'\n').collect();
    if lines.len() != COMMAND_LINES {
        return Err(GatewayError::ParseFailed);
    }

    let version = trim_line(lines[0]);
    if version.is_empty() || !version.starts_with(char::from(PROBE_BYTE)) {
        return Err(GatewayError::UnsupportedProtocol);
    }
    let mut cmd = Command {
        version: version.to_string(),
        app_id: trim_line(lines[1]).to_string(),
        name: trim_line(lines[2]).to_string(),
        data: None,
        payload: trim_payload(lines[4]).to_vec(),
    };
    cmd.parse_data(lines[3])?;
    Ok(cmd)
}

/// 将信令编码
pub fn compose(cmd: &Command) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64 + cmd.payload.len());
    buf.extend_from_slice(VERSION.as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(cmd.app_id.as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(cmd.name.as_bytes());
    buf.push(b'\n');
    if let Some(data) = &cmd.data {
        buf.extend_from_slice(data.to_json()?.as_bytes());
    }
    buf.push(b'\n');
    buf.extend_from_slice(&cmd.payload);
    buf.push(b'\n');
    Ok(buf)
}

fn trim_line(line: &[u8]) -> &str {
    std::str::from_utf8(line)
        .unwrap_or("")
        .trim_matches(|c| c == '\r' || c == '\t' || c == '\n' || c == ' ')
}

fn trim_payload(payload: &[u8]) -> &[u8] {
    let start = payload
        .iter()
        .position(|b| *b != b'\r' && *b != b'\n')
        .unwrap_or(payload.len());
    let end = payload
        .iter()
        .rposition(|b| *b != b'\r' && *b != b'\n')
        .map(|i| i + 1)
        .unwrap_or(start);
    &payload[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandData;

    #[test]
    fn parses_five_line_frame() {
        let raw = b"t1\ntest\nlogin\n{\"userid\":\"123\",\"deviceid\":\"web\",\"timestamp\":1234567,\"token\":\"AB\"}\npayload-bytes\n";
        let cmd = parse(raw).expect("parse");
        assert_eq!(cmd.version, "t1");
        assert_eq!(cmd.app_id, "test");
        assert_eq!(cmd.name, "login");
        assert!(matches!(cmd.data, Some(CommandData::Login(_))));
        assert_eq!(cmd.payload, b"payload-bytes");
    }

    #[test]
    fn payload_is_message_remainder() {
        // 一次性解析时负载可以含换行
        let raw = b"t1\ntest\nmsg/foo\n\nline one\nline two";
        let cmd = parse(raw).expect("parse");
        assert_eq!(cmd.payload, b"line one\nline two");
        assert!(cmd.data.is_none());
    }

    #[test]
    fn wrong_line_count_is_parse_failed() {
        assert!(matches!(
            parse(b"t1\ntest\nlogin\n").unwrap_err(),
            GatewayError::ParseFailed
        ));
    }

    #[test]
    fn wrong_version_marker_is_unsupported() {
        assert!(matches!(
            parse(b"x1\ntest\nlogin\n\np\n").unwrap_err(),
            GatewayError::UnsupportedProtocol
        ));
    }

    #[test]
    fn fields_are_trimmed() {
        let raw = b"t1\r\n test \nmsg\r\n\npay\n";
        let cmd = parse(raw).expect("parse");
        assert_eq!(cmd.app_id, "test");
        assert_eq!(cmd.name, "msg");
        assert_eq!(cmd.payload, b"pay");
    }
}
