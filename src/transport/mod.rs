//! 连接与会话回调抽象
//!
//! 传输层独占底层套接字，为每个接入创建一个 `Connection`；
//! 网关服务通过 `SessionHandler` 回调驱动，只持有连接的非拥有引用。

pub mod tls;
pub mod ws;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Command;

/// 组合标识：`app_id#user_id`，同一用户的多设备连接共用一个键
pub fn connection_id(app_id: &str, user_id: &str) -> String {
    format!("{app_id}#{user_id}")
}

/// 登录后的连接身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub app_id: String,
    pub user_id: String,
    pub device_id: String,
}

impl ConnectionIdentity {
    /// 注册表键
    pub fn composite_id(&self) -> String {
        connection_id(&self.app_id, &self.user_id)
    }
}

/// 连接接口
#[async_trait]
pub trait Connection: Send + Sync {
    /// 传输层连接编号（登录前即存在，仅用于日志与判等）
    fn conn_seq(&self) -> &str;

    /// 登录身份；未认证时为 `None`
    fn identity(&self) -> Option<ConnectionIdentity>;

    /// 登录状态
    fn is_login(&self) -> bool;

    /// 登入成功，连接绑定身份；每个套接字最多发生一次
    fn login_success(&self, app_id: &str, user_id: &str, device_id: &str);

    /// 协商出的线上格式版本
    fn wire_version(&self) -> String;

    /// 对端地址（日志用）
    fn remote_addr(&self) -> String;

    /// 发送信令
    async fn send(&self, cmd: &Command) -> Result<()>;

    /// 关闭连接；`force` 表示服务端主动踢断
    async fn close(&self, force: bool);
}

/// 服务回调接口
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// 当有新连接建立
    async fn on_new_connection(&self, conn: std::sync::Arc<dyn Connection>);

    /// 当有连接关闭
    async fn on_close_connection(&self, conn: std::sync::Arc<dyn Connection>);

    /// 当收到命令；返回错误将导致连接被强制关闭
    async fn on_received_command(
        &self,
        conn: std::sync::Arc<dyn Connection>,
        cmd: Command,
    ) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_id_joins_app_and_user() {
        let identity = ConnectionIdentity {
            app_id: "test".into(),
            user_id: "42".into(),
            device_id: "web".into(),
        };
        assert_eq!(identity.composite_id(), "test#42");
        assert_eq!(connection_id("test", "42"), "test#42");
    }
}
