//! 信令编解码注册表
//!
//! 每种线上格式注册一个探测字节（报文首字节）与一个版本串：
//! 解析按探测字节分发，编码按 `Command.version` 分发。
//! 注册表在启动时显式构建并注入使用方，不依赖全局可变状态。

pub mod alljson;
pub mod plaintext;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;

use crate::error::{GatewayError, Result};
use crate::protocol::Command;

/// 流式解析引擎
///
/// 传输层可能把一条报文拆成多次投递；引擎在缓冲上做增量解析，
/// 报文不完整时返回 `Ok(None)`，由调用方继续喂入字节。
pub trait ParseEngine: Send {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Command>>;
}

/// 串行化格式描述，所有实现都必须提供以下函数
pub struct Serializer {
    /// 串行化版本
    pub version: &'static str,
    /// 协议探测字节
    pub probe_byte: u8,
    /// 新建流式解析引擎
    pub new_engine: fn() -> Box<dyn ParseEngine>,
    /// 一次性解析完整报文
    pub parse: fn(&[u8]) -> Result<Command>,
    /// 将信令编码
    pub compose: fn(&Command) -> Result<Vec<u8>>,
}

/// 串行化注册表
pub struct SerializerRegistry {
    by_probe: HashMap<u8, Arc<Serializer>>,
    by_version: HashMap<&'static str, Arc<Serializer>>,
}

impl SerializerRegistry {
    /// 新建空注册表
    pub fn new() -> Self {
        Self {
            by_probe: HashMap::new(),
            by_version: HashMap::new(),
        }
    }

    /// 新建注册表并注册内置格式（纯文本 `t1` 与 JSON `j1`）
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(plaintext::serializer());
        registry.register(alljson::serializer());
        registry
    }

    /// 注册串行化格式
    pub fn register(&mut self, serializer: Serializer) {
        let serializer = Arc::new(serializer);
        self.by_probe.insert(serializer.probe_byte, serializer.clone());
        self.by_version.insert(serializer.version, serializer);
    }

    /// 一次性解析完整报文，按首字节分发
    pub fn parse(&self, message: &[u8]) -> Result<Command> {
        if message.is_empty() {
            return Err(GatewayError::InvalidParameter("empty message".to_string()));
        }
        let serializer = self
            .by_probe
            .get(&message[0])
            .ok_or(GatewayError::UnsupportedProtocol)?;
        (serializer.parse)(message)
    }

    /// 将信令编码，按 `Command.version` 分发
    pub fn compose(&self, cmd: &Command) -> Result<Vec<u8>> {
        let serializer = self
            .by_version
            .get(cmd.version.as_str())
            .ok_or(GatewayError::UnsupportedProtocol)?;
        (serializer.compose)(cmd)
    }

    fn engine_for(&self, probe: u8) -> Result<Box<dyn ParseEngine>> {
        let serializer = self
            .by_probe
            .get(&probe)
            .ok_or(GatewayError::UnsupportedProtocol)?;
        Ok((serializer.new_engine)())
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// 流式解析器
///
/// 首条报文的首字节决定引擎，之后整条流沿用同一引擎。
pub struct CommandDecoder {
    registry: Arc<SerializerRegistry>,
    engine: Option<Box<dyn ParseEngine>>,
    buf: BytesMut,
}

impl CommandDecoder {
    pub fn new(registry: Arc<SerializerRegistry>) -> Self {
        Self {
            registry,
            engine: None,
            buf: BytesMut::new(),
        }
    }

    /// 喂入一段字节
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// 尝试取出下一条完整信令；缓冲不足时返回 `Ok(None)`
    pub fn try_next(&mut self) -> Result<Option<Command>> {
        if self.engine.is_none() {
            let Some(probe) = self.buf.first().copied() else {
                return Ok(None);
            };
            self.engine = Some(self.registry.engine_for(probe)?);
        }
        match self.engine.as_mut() {
            Some(engine) => engine.decode(&mut self.buf),
            None => Ok(None),
        }
    }
}
