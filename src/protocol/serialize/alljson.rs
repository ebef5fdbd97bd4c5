//! JSON 格式
//!
//! 所有以 `{` 开头的报文按单个 JSON 对象处理：
//! `{"version":"j1","appid":"...","name":"...","data":{...},"payload":"..."}`
//! 负载以原始字符串编码，因此 `j1` 要求负载为合法 UTF-8。

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::protocol::{Command, CommandData};

use super::{ParseEngine, Serializer};

/// 版本
pub const VERSION: &str = "j1";
/// 协议探测字节
pub const PROBE_BYTE: u8 = b'{';

/// JSON 串行化描述
pub fn serializer() -> Serializer {
    Serializer {
        version: VERSION,
        probe_byte: PROBE_BYTE,
        new_engine: || Box::new(Engine),
        parse,
        compose,
    }
}

/// 线上 JSON 对象
#[derive(Serialize, Deserialize)]
struct WireCommand {
    version: String,
    appid: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
}

struct Engine;

impl ParseEngine for Engine {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Command>> {
        // serde_json 的流式反序列化负责找到对象边界；
        // 对象尚未到齐时表现为 EOF 错误，继续等字节。
        let (item, consumed) = {
            let mut stream =
                serde_json::Deserializer::from_slice(&buf[..]).into_iter::<WireCommand>();
            let item = stream.next();
            (item, stream.byte_offset())
        };
        match item {
            None => Ok(None),
            Some(Ok(wire)) => {
                buf.advance(consumed);
                into_command(wire).map(Some)
            }
            Some(Err(err)) if err.is_eof() => Ok(None),
            Some(Err(_)) => Err(GatewayError::ParseFailed),
        }
    }
}

/// 一次性解析完整报文
pub fn parse(message: &[u8]) -> Result<Command> {
    let mut buf = BytesMut::from(message);
    match Engine.decode(&mut buf)? {
        Some(cmd) => Ok(cmd),
        None => Err(GatewayError::ParseFailed),
    }
}

fn into_command(wire: WireCommand) -> Result<Command> {
    let mut cmd = Command {
        version: wire.version,
        app_id: wire.appid,
        name: wire.name,
        data: None,
        payload: wire.payload.map(String::into_bytes).unwrap_or_default(),
    };
    if let Some(value) = wire.data {
        cmd.data = CommandData::decode_value(cmd.first_part_name(), &value)?;
    }
    Ok(cmd)
}

/// 将信令编码
pub fn compose(cmd: &Command) -> Result<Vec<u8>> {
    let payload = if cmd.payload.is_empty() {
        None
    } else {
        Some(String::from_utf8(cmd.payload.clone()).map_err(|_| {
            GatewayError::InvalidParameter("j1 payload must be valid utf-8".to_string())
        })?)
    };
    let wire = WireCommand {
        version: VERSION.to_string(),
        appid: cmd.app_id.clone(),
        name: cmd.name.clone(),
        data: match &cmd.data {
            Some(data) => Some(data.to_value()?),
            None => None,
        },
        payload,
    };
    serde_json::to_vec(&wire).map_err(GatewayError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandData, PushToUserData};

    #[test]
    fn parses_object_frame() {
        let raw = br#"{"version":"j1","appid":"test","name":"p2u","data":{"useridlist":"a,b"},"payload":"foo bar"}"#;
        let cmd = parse(raw).expect("parse");
        assert_eq!(cmd.version, "j1");
        assert_eq!(cmd.app_id, "test");
        assert_eq!(
            cmd.data,
            Some(CommandData::PushToUser(PushToUserData {
                user_id_list: "a,b".to_string(),
            }))
        );
        assert_eq!(cmd.payload, b"foo bar");
    }

    #[test]
    fn missing_data_and_payload_are_optional() {
        let raw = br#"{"version":"j1","appid":"test","name":"hb"}"#;
        let cmd = parse(raw).expect("parse");
        assert!(cmd.data.is_none());
        assert!(cmd.payload.is_empty());
    }

    #[test]
    fn truncated_object_is_parse_failed() {
        assert!(matches!(
            parse(br#"{"version":"j1","appid":"#).unwrap_err(),
            GatewayError::ParseFailed
        ));
    }

    #[test]
    fn non_utf8_payload_cannot_compose() {
        let cmd = Command {
            version: VERSION.to_string(),
            app_id: "test".to_string(),
            name: "msg".to_string(),
            data: None,
            payload: vec![0xff, 0xfe],
        };
        assert!(matches!(
            compose(&cmd).unwrap_err(),
            GatewayError::InvalidParameter(_)
        ));
    }
}
