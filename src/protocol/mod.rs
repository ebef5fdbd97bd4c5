//! 信令协议定义
//!
//! `Command` 是网关内外交换的统一信令封装；信令名用 `/` 分隔多级，
//! 首段决定 `data` 的具体类型，未知首段不报错、`data` 保持为空。

pub mod serialize;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 登入
pub const LOGIN: &str = "login";
/// 关闭
pub const CLOSE: &str = "close";
/// 消息
pub const MESSAGE: &str = "msg";
/// 心跳
pub const HEART_BEAT: &str = "hb";
/// 心跳响应
pub const HEART_BEAT_RESPONSE: &str = "hbr";
/// 推送给用户
pub const PUSH_TO_USER: &str = "p2u";

/// 信令
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    /// 信令版本，标识编解码格式（如 `t1`、`j1`）
    pub version: String,
    /// 信令所属租户
    pub app_id: String,
    /// 信令名，用 `/` 分隔多级（用于路由），例如：`msg/foo/bar`
    pub name: String,
    /// 网关信令数据，按信令名首段解码
    pub data: Option<CommandData>,
    /// 业务数据，网关不做解释
    pub payload: Vec<u8>,
}

impl Command {
    /// 信令名首段（路由键）
    pub fn first_part_name(&self) -> &str {
        match self.name.find('/') {
            Some(idx) => &self.name[..idx],
            None => &self.name,
        }
    }

    /// 复制一份用于推送的信令：`data` 清空，`payload` 保留
    pub fn to_push_copy(&self) -> Command {
        Command {
            version: self.version.clone(),
            app_id: self.app_id.clone(),
            name: self.name.clone(),
            data: None,
            payload: self.payload.clone(),
        }
    }

    /// 按信令名首段解析 `data` 字段
    ///
    /// 空白数据行视为无数据；未知首段不算错误。
    pub fn parse_data(&mut self, raw: &[u8]) -> Result<()> {
        self.data = CommandData::decode(self.first_part_name(), raw)?;
        Ok(())
    }
}

/// 网关通用信令数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GatewayCommonData {
    /// 用户ID
    #[serde(rename = "userid", default)]
    pub user_id: String,
    /// 设备ID
    #[serde(rename = "deviceid", default)]
    pub device_id: String,
    /// Unix时间戳（单位秒）
    #[serde(default)]
    pub timestamp: i64,
    /// 认证字
    #[serde(default)]
    pub token: String,
}

/// 推送数据：目标用户ID，逗号分隔，`*` 表示租户全量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PushToUserData {
    #[serde(rename = "useridlist", default)]
    pub user_id_list: String,
}

/// 信令数据变体，由信令名首段选择
#[derive(Debug, Clone, PartialEq)]
pub enum CommandData {
    Login(GatewayCommonData),
    Close(GatewayCommonData),
    Message(GatewayCommonData),
    PushToUser(PushToUserData),
}

impl CommandData {
    /// 按首段解码；未知首段返回 `None`
    pub fn decode(first_part: &str, raw: &[u8]) -> Result<Option<CommandData>> {
        let trimmed = trim_ascii(raw);
        if trimmed.is_empty() {
            return Ok(None);
        }
        let data = match first_part {
            LOGIN => Some(CommandData::Login(serde_json::from_slice(trimmed)?)),
            CLOSE => Some(CommandData::Close(serde_json::from_slice(trimmed)?)),
            MESSAGE => Some(CommandData::Message(serde_json::from_slice(trimmed)?)),
            PUSH_TO_USER => Some(CommandData::PushToUser(serde_json::from_slice(trimmed)?)),
            _ => None,
        };
        Ok(data)
    }

    /// 从 JSON 值解码（alljson 格式使用）
    pub fn decode_value(first_part: &str, value: &serde_json::Value) -> Result<Option<CommandData>> {
        if value.is_null() {
            return Ok(None);
        }
        let data = match first_part {
            LOGIN => Some(CommandData::Login(serde_json::from_value(value.clone())?)),
            CLOSE => Some(CommandData::Close(serde_json::from_value(value.clone())?)),
            MESSAGE => Some(CommandData::Message(serde_json::from_value(value.clone())?)),
            PUSH_TO_USER => Some(CommandData::PushToUser(serde_json::from_value(
                value.clone(),
            )?)),
            _ => None,
        };
        Ok(data)
    }

    /// 编码为 JSON 字符串
    pub fn to_json(&self) -> Result<String> {
        let json = match self {
            CommandData::Login(d) | CommandData::Close(d) | CommandData::Message(d) => {
                serde_json::to_string(d)?
            }
            CommandData::PushToUser(d) => serde_json::to_string(d)?,
        };
        Ok(json)
    }

    /// 编码为 JSON 值
    pub fn to_value(&self) -> Result<serde_json::Value> {
        let value = match self {
            CommandData::Login(d) | CommandData::Close(d) | CommandData::Message(d) => {
                serde_json::to_value(d)?
            }
            CommandData::PushToUser(d) => serde_json::to_value(d)?,
        };
        Ok(value)
    }
}

fn trim_ascii(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b" \t\r\n".contains(b))
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b" \t\r\n".contains(b))
        .map(|i| i + 1)
        .unwrap_or(start);
    &raw[start..end]
}
