//! 异步消息接口
//!
//! 网关与业务后端之间的发布/订阅抽象，以 `Command` 为交换单位。
//! 投递语义：发布侧 at-most-once，订阅侧入队即确认、失败不重投。

pub mod httpapi;
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Command;

/// 异步消息接口
#[async_trait]
pub trait Broker: Send + Sync {
    /// 发布消息并等待响应；空响应体表示"无响应"
    async fn publish(&self, tag: &str, cmd: &Command) -> Result<Option<Command>>;

    /// 订阅指定 tag，逐条回调 `handler`；直到被取消才返回
    async fn subscribe(&self, tag: &str, handler: Arc<dyn SubscribeHandler>) -> Result<()>;
}

/// 订阅消息处理接口
///
/// 单次调用的 panic 被隔离，错误只记录日志，消息不会重投。
#[async_trait]
pub trait SubscribeHandler: Send + Sync {
    async fn handle(&self, tag: &str, cmd: Command) -> Result<()>;
}
