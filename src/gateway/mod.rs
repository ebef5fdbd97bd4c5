//! 网关服务
//!
//! 持有连接注册表、租户目录与各租户路由表；实现传输层的会话回调，
//! 驱动认证状态机、信令转发与推送扇出。

pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::broker::SubscribeHandler;
use crate::error::{GatewayError, Result};
use crate::protocol::{self, Command, CommandData, GatewayCommonData};
use crate::router::RouteTable;
use crate::tenant::{App, AppDirectory};
use crate::transport::{Connection, SessionHandler};
use crate::util;

use registry::ConnectionRegistry;

/// 服务名
pub const SERVER_NAME: &str = "gateway";
/// 默认登录时间戳有效窗口（单位秒）
pub const DEFAULT_LOGIN_TIMEOUT_SECS: i64 = 3600;
/// 默认发布 tag
pub const DEFAULT_PUBLISH_TAG: &str = "gateway";

/// 网关服务
pub struct GatewayServer {
    apps: Arc<AppDirectory>,
    routers: HashMap<String, Arc<dyn RouteTable>>,
    registry: ConnectionRegistry,
    publish_tag: String,
    login_timeout_secs: i64,
}

impl GatewayServer {
    pub fn new(
        apps: Arc<AppDirectory>,
        routers: HashMap<String, Arc<dyn RouteTable>>,
        publish_tag: impl Into<String>,
        login_timeout_secs: i64,
    ) -> Self {
        Self {
            apps,
            routers,
            registry: ConnectionRegistry::new(),
            publish_tag: publish_tag.into(),
            login_timeout_secs,
        }
    }

    /// 活连接数
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// 校验登录数据；任何不通过都要求重新认证
    fn verify_login(&self, app: &App, data: &GatewayCommonData) -> Result<()> {
        if data.timestamp + self.login_timeout_secs < util::unix_now() {
            warn!(app_id = %app.id, user_id = %data.user_id, "login timestamp expired");
            return Err(GatewayError::NeedAuth);
        }
        let expect = app.login_token(&data.user_id, &data.device_id, data.timestamp);
        if !expect.eq_ignore_ascii_case(&data.token) {
            warn!(app_id = %app.id, user_id = %data.user_id, "login token mismatch");
            return Err(GatewayError::NeedAuth);
        }
        Ok(())
    }

    /// 推送消息给用户
    ///
    /// 注册表在锁内取快照，真正的套接字写全部发生在锁外，
    /// 避免慢连接把注册表拖住。
    pub async fn push_to_user(&self, cmd: &Command) {
        let Some(CommandData::PushToUser(push)) = &cmd.data else {
            warn!(name = %cmd.name, "push command without target list");
            return;
        };
        let targets = if push.user_id_list == "*" {
            self.registry.snapshot_app(&cmd.app_id)
        } else {
            self.registry
                .snapshot_users(&cmd.app_id, push.user_id_list.split(','))
        };
        if targets.is_empty() {
            debug!(app_id = %cmd.app_id, list = %push.user_id_list, "push matched no connection");
            return;
        }

        let outgoing = cmd.to_push_copy();
        info!(app_id = %cmd.app_id, targets = targets.len(), "push to user");
        for conn in targets {
            if let Err(err) = conn.send(&outgoing).await {
                warn!(?err, conn = %conn.conn_seq(), "push delivery failed");
            }
        }
    }

    /// 关闭所有已注册连接（安全退出路径）；关闭在锁外进行
    pub async fn close_connections(&self) {
        let connections = self.registry.drain();
        info!(count = connections.len(), "closing registered connections");
        for conn in connections {
            conn.close(true).await;
        }
    }
}

#[async_trait]
impl SessionHandler for GatewayServer {
    async fn on_new_connection(&self, conn: Arc<dyn Connection>) {
        // TODO: 给未登录连接加认证超时，超时未登录即断开
        debug!(conn = %conn.conn_seq(), peer = %conn.remote_addr(), "new connection");
    }

    async fn on_close_connection(&self, conn: Arc<dyn Connection>) {
        self.registry.remove(&conn);
        debug!(conn = %conn.conn_seq(), "connection unregistered");
    }

    async fn on_received_command(&self, conn: Arc<dyn Connection>, cmd: Command) -> Result<()> {
        debug!(conn = %conn.conn_seq(), name = %cmd.name, "received command");

        let first = cmd.first_part_name().to_string();
        // 未认证连接的第一条命令必须是登录
        if first != protocol::LOGIN && !conn.is_login() {
            warn!(conn = %conn.conn_seq(), name = %cmd.name, "command before login");
            conn.close(false).await;
            return Err(GatewayError::UnsupportedProtocol);
        }

        let Some(app) = self.apps.get(&cmd.app_id) else {
            warn!(app_id = %cmd.app_id, "no application found");
            conn.close(false).await;
            return Err(GatewayError::UnknownApp(cmd.app_id.clone()));
        };

        let mut login_data = None;
        if first == protocol::LOGIN {
            let Some(CommandData::Login(data)) = &cmd.data else {
                warn!(conn = %conn.conn_seq(), "login without credentials");
                return Err(GatewayError::NeedAuth);
            };
            if data.user_id.is_empty() {
                warn!(conn = %conn.conn_seq(), "login user id is empty");
                return Err(GatewayError::AuthFailed);
            }
            if app.token_check {
                self.verify_login(&app, data)?;
            }
            login_data = Some(data.clone());
        }

        // 路由：按信令名前缀找 broker；没有路由不算错误
        let response = match self
            .routers
            .get(&cmd.app_id)
            .and_then(|router| router.find(&cmd.name))
        {
            Some(broker) => broker.publish(&self.publish_tag, &cmd).await?,
            None => {
                debug!(app_id = %cmd.app_id, name = %cmd.name, "no route");
                None
            }
        };

        if let Some(resp) = &response {
            if resp.name == protocol::CLOSE {
                info!(conn = %conn.conn_seq(), "backend asked to close connection");
                conn.close(true).await;
                return Err(GatewayError::AuthFailed);
            }
        }

        if let Some(data) = login_data {
            if !conn.is_login() {
                conn.login_success(&cmd.app_id, &data.user_id, &data.device_id);
                info!(
                    conn = %conn.conn_seq(),
                    app_id = %cmd.app_id,
                    user_id = %data.user_id,
                    device_id = %data.device_id,
                    "login success"
                );
                if let Some(replaced) = self.registry.insert(conn.clone()) {
                    warn!(conn = %replaced.conn_seq(), "replace same-device connection");
                    // 在锁外关闭旧连接，防止死锁
                    replaced.close(false).await;
                }
            }
        }

        if let Some(resp) = response {
            if resp.first_part_name() == protocol::PUSH_TO_USER {
                self.push_to_user(&resp).await;
            }
        }
        Ok(())
    }
}

/// 推送订阅处理：broker 订阅回调里只认 `p2u`
pub struct PushSubscribeHandler {
    gateway: Arc<GatewayServer>,
}

impl PushSubscribeHandler {
    pub fn new(gateway: Arc<GatewayServer>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl SubscribeHandler for PushSubscribeHandler {
    async fn handle(&self, tag: &str, cmd: Command) -> Result<()> {
        if cmd.first_part_name() == protocol::PUSH_TO_USER {
            self.gateway.push_to_user(&cmd).await;
        } else {
            warn!(%tag, name = %cmd.name, "unexpected command on push tag");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::protocol::PushToUserData;
    use crate::router::RouteTable;
    use crate::transport::testing::FakeConnection;

    struct SingleRoute(Arc<MockBroker>);

    impl RouteTable for SingleRoute {
        fn find(&self, _name: &str) -> Option<Arc<dyn crate::broker::Broker>> {
            Some(self.0.clone())
        }
    }

    fn gateway_with_broker(token_check: bool) -> (Arc<GatewayServer>, Arc<MockBroker>) {
        let mut apps = AppDirectory::new();
        apps.insert(App::new("test", "1234567890", token_check));
        let broker = Arc::new(MockBroker::new());
        let mut routers: HashMap<String, Arc<dyn RouteTable>> = HashMap::new();
        routers.insert("test".to_string(), Arc::new(SingleRoute(broker.clone())));
        let gateway = Arc::new(GatewayServer::new(
            Arc::new(apps),
            routers,
            DEFAULT_PUBLISH_TAG,
            DEFAULT_LOGIN_TIMEOUT_SECS,
        ));
        (gateway, broker)
    }

    fn login_command(app: &App, user_id: &str, device_id: &str) -> Command {
        let timestamp = util::unix_now();
        Command {
            version: "t1".to_string(),
            app_id: app.id.clone(),
            name: protocol::LOGIN.to_string(),
            data: Some(CommandData::Login(GatewayCommonData {
                user_id: user_id.to_string(),
                device_id: device_id.to_string(),
                timestamp,
                token: app.login_token(user_id, device_id, timestamp),
            })),
            payload: b"login payload".to_vec(),
        }
    }

    #[tokio::test]
    async fn command_before_login_closes_connection() {
        let (gateway, _broker) = gateway_with_broker(false);
        let conn = FakeConnection::new();
        let cmd = Command {
            version: "t1".into(),
            app_id: "test".into(),
            name: "msg/foo".into(),
            ..Default::default()
        };
        let err = gateway
            .on_received_command(conn.clone(), cmd)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedProtocol));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn unknown_app_closes_connection() {
        let (gateway, _broker) = gateway_with_broker(false);
        let conn = FakeConnection::new();
        let mut cmd = login_command(&App::new("ghost", "k", false), "u", "web");
        cmd.app_id = "ghost".into();
        let err = gateway
            .on_received_command(conn.clone(), cmd)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownApp(_)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn login_without_data_needs_auth() {
        let (gateway, _broker) = gateway_with_broker(false);
        let conn = FakeConnection::new();
        let cmd = Command {
            version: "t1".into(),
            app_id: "test".into(),
            name: protocol::LOGIN.into(),
            ..Default::default()
        };
        let err = gateway
            .on_received_command(conn.clone(), cmd)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NeedAuth));
        // NeedAuth 不断开，客户端可以重试
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn empty_user_id_is_auth_failed() {
        let (gateway, _broker) = gateway_with_broker(false);
        let conn = FakeConnection::new();
        let app = App::new("test", "1234567890", false);
        let mut cmd = login_command(&app, "", "web");
        if let Some(CommandData::Login(ref mut data)) = cmd.data {
            data.user_id.clear();
        }
        let err = gateway
            .on_received_command(conn.clone(), cmd)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AuthFailed));
    }

    #[tokio::test]
    async fn bad_token_and_stale_timestamp_need_auth() {
        let (gateway, _broker) = gateway_with_broker(true);
        let app = App::new("test", "1234567890", true);

        let conn = FakeConnection::new();
        let mut cmd = login_command(&app, "u1", "web");
        if let Some(CommandData::Login(ref mut data)) = cmd.data {
            data.token = "DEADBEEF".to_string();
        }
        assert!(matches!(
            gateway.on_received_command(conn.clone(), cmd).await.unwrap_err(),
            GatewayError::NeedAuth
        ));

        let stale_ts = util::unix_now() - DEFAULT_LOGIN_TIMEOUT_SECS - 1;
        let stale = Command {
            version: "t1".into(),
            app_id: "test".into(),
            name: protocol::LOGIN.into(),
            data: Some(CommandData::Login(GatewayCommonData {
                user_id: "u1".into(),
                device_id: "web".into(),
                timestamp: stale_ts,
                token: app.login_token("u1", "web", stale_ts),
            })),
            payload: Vec::new(),
        };
        assert!(matches!(
            gateway.on_received_command(conn.clone(), stale).await.unwrap_err(),
            GatewayError::NeedAuth
        ));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn token_comparison_is_case_insensitive() {
        let (gateway, _broker) = gateway_with_broker(true);
        let app = App::new("test", "1234567890", true);
        let conn = FakeConnection::new();
        let mut cmd = login_command(&app, "u1", "web");
        if let Some(CommandData::Login(ref mut data)) = cmd.data {
            data.token = data.token.to_lowercase();
        }
        gateway
            .on_received_command(conn.clone(), cmd)
            .await
            .expect("lowercase token accepted");
        assert!(conn.is_login());
    }

    #[tokio::test]
    async fn login_registers_and_replaces_same_device() {
        let (gateway, broker) = gateway_with_broker(true);
        let app = App::new("test", "1234567890", true);

        let first = FakeConnection::new();
        gateway
            .on_received_command(first.clone(), login_command(&app, "u1", "web"))
            .await
            .expect("first login");
        assert!(first.is_login());
        assert_eq!(gateway.connection_count(), 1);

        let second = FakeConnection::new();
        gateway
            .on_received_command(second.clone(), login_command(&app, "u1", "web"))
            .await
            .expect("second login");
        assert_eq!(gateway.connection_count(), 1);
        assert!(first.is_closed(), "replaced connection must be closed");
        assert!(!second.is_closed());

        // 转发应该带着原始命令到达 broker
        let published = broker.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, DEFAULT_PUBLISH_TAG);
    }

    #[tokio::test]
    async fn close_response_force_closes() {
        let (gateway, broker) = gateway_with_broker(false);
        let app = App::new("test", "1234567890", false);
        broker.push_response(Ok(Some(Command {
            version: "t1".into(),
            app_id: "test".into(),
            name: protocol::CLOSE.into(),
            ..Default::default()
        })));

        let conn = FakeConnection::new();
        let err = gateway
            .on_received_command(conn.clone(), login_command(&app, "u1", "web"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AuthFailed));
        assert!(conn.is_closed());
        assert_eq!(gateway.connection_count(), 0);
    }

    #[tokio::test]
    async fn p2u_response_broadcasts_with_data_cleared() {
        let (gateway, broker) = gateway_with_broker(false);
        let app = App::new("test", "1234567890", false);

        // 先注册三个用户
        for user in ["a", "b", "c"] {
            let conn = FakeConnection::new();
            gateway
                .on_received_command(conn, login_command(&app, user, "web"))
                .await
                .expect("login");
        }
        assert_eq!(gateway.connection_count(), 3);

        let push = Command {
            version: "t1".into(),
            app_id: "test".into(),
            name: protocol::PUSH_TO_USER.into(),
            data: Some(CommandData::PushToUser(PushToUserData {
                user_id_list: "*".into(),
            })),
            payload: b"broadcast payload".to_vec(),
        };
        broker.push_response(Ok(Some(push)));

        let sender = FakeConnection::new();
        gateway
            .on_received_command(sender.clone(), login_command(&app, "d", "web"))
            .await
            .expect("login with push response");

        // 包括发起者在内的四个连接都应收到，data 清空、payload 原样
        let targets = gateway.registry.snapshot_app("test");
        assert_eq!(targets.len(), 4);
        let delivered = sender.sent_commands();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].data.is_none());
        assert_eq!(delivered[0].payload, b"broadcast payload");
    }

    #[tokio::test]
    async fn explicit_user_list_targets_only_named_users() {
        let (gateway, _broker) = gateway_with_broker(false);
        let a = FakeConnection::logged_in("test", "a", "web");
        let b = FakeConnection::logged_in("test", "b", "web");
        let c = FakeConnection::logged_in("test", "c", "web");
        for conn in [&a, &b, &c] {
            gateway.registry.insert(conn.clone());
        }

        let push = Command {
            version: "t1".into(),
            app_id: "test".into(),
            name: protocol::PUSH_TO_USER.into(),
            data: Some(CommandData::PushToUser(PushToUserData {
                user_id_list: "a,c,missing".into(),
            })),
            payload: b"targeted".to_vec(),
        };
        gateway.push_to_user(&push).await;

        assert_eq!(a.sent_commands().len(), 1);
        assert!(b.sent_commands().is_empty());
        assert_eq!(c.sent_commands().len(), 1);
    }

    #[tokio::test]
    async fn no_route_is_a_silent_noop() {
        let mut apps = AppDirectory::new();
        apps.insert(App::new("test", "k", false));
        let gateway = Arc::new(GatewayServer::new(
            Arc::new(apps),
            HashMap::new(),
            DEFAULT_PUBLISH_TAG,
            DEFAULT_LOGIN_TIMEOUT_SECS,
        ));
        let app = App::new("test", "k", false);
        let conn = FakeConnection::new();
        gateway
            .on_received_command(conn.clone(), login_command(&app, "u1", "web"))
            .await
            .expect("no route is not an error");
        assert!(conn.is_login());
    }

    #[tokio::test]
    async fn disconnect_unregisters_connection() {
        let (gateway, _broker) = gateway_with_broker(false);
        let app = App::new("test", "1234567890", false);
        let conn = FakeConnection::new();
        gateway
            .on_received_command(conn.clone(), login_command(&app, "u1", "web"))
            .await
            .expect("login");
        assert_eq!(gateway.connection_count(), 1);

        gateway.on_close_connection(conn.clone()).await;
        assert_eq!(gateway.connection_count(), 0);
        // 再次关闭是空操作
        gateway.on_close_connection(conn).await;
    }
}
