//! 服务装配
//!
//! 组合根：租户目录 → 路由表/发布 broker → 网关服务 → 接入层与推送
//! broker，全部登记到安全退出协调器。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::broker::httpapi::{self, HttpApiBroker};
use crate::config::AppConfig;
use crate::error::Result;
use crate::gateway::{self, GatewayServer, PushSubscribeHandler};
use crate::protocol::serialize::SerializerRegistry;
use crate::router::{PrefixRouter, RouteTable};
use crate::shutdown::ShutdownCoordinator;
use crate::tenant::AppDirectory;
use crate::transport::SessionHandler;
use crate::transport::ws::{self, WsParameter, WsServer};

/// 已启动的网关应用
pub struct GatewayApplication {
    /// 明文接入实际绑定地址
    pub ws_addr: SocketAddr,
    /// 推送（broker 订阅侧）实际绑定地址
    pub push_addr: SocketAddr,
    coordinator: Arc<ShutdownCoordinator>,
    close_grace: Duration,
}

impl GatewayApplication {
    /// 装配并启动全部子系统
    pub async fn start(config: AppConfig) -> Result<Self> {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let serializers = Arc::new(SerializerRegistry::with_defaults());

        let (apps, route_maps) = AppDirectory::load(&config.gateway.app_configs)?;
        let apps = Arc::new(apps);

        // 发布 broker 按目标地址复用
        let mut publishers: HashMap<String, Arc<dyn Broker>> = HashMap::new();
        let mut routers: HashMap<String, Arc<dyn RouteTable>> = HashMap::new();
        for (app_id, route_map) in &route_maps {
            let router = PrefixRouter::from_map(route_map, |url| {
                if let Some(existing) = publishers.get(url) {
                    return Ok(existing.clone());
                }
                let publisher: Arc<dyn Broker> = Arc::new(HttpApiBroker::publisher(
                    url,
                    apps.clone(),
                    serializers.clone(),
                    config.broker.request_timeout_secs,
                )?);
                publishers.insert(url.to_string(), publisher.clone());
                Ok(publisher)
            })?;
            routers.insert(app_id.clone(), Arc::new(router) as Arc<dyn RouteTable>);
        }

        let gateway = Arc::new(GatewayServer::new(
            apps.clone(),
            routers,
            config.gateway.publish_tag.clone(),
            config.gateway.login_timeout_secs,
        ));

        // 推送 broker：订阅侧服务 + 网关的推送订阅循环
        let push_broker = Arc::new(HttpApiBroker::new(
            "http://127.0.0.1",
            apps.clone(),
            serializers.clone(),
            config.broker.queue_size,
            config.broker.replay_window_secs,
            config.broker.request_timeout_secs,
        )?);
        let push_bind: SocketAddr = config
            .gateway
            .push_bind
            .parse()
            .with_context(|| format!("invalid push bind {}", config.gateway.push_bind))?;
        let push_addr = push_broker.clone().run(push_bind).await?;
        {
            let broker = push_broker.clone();
            let handler = Arc::new(PushSubscribeHandler::new(gateway.clone()));
            let push_tag = config.gateway.push_tag.clone();
            tokio::spawn(async move {
                if let Err(err) = broker.subscribe(&push_tag, handler).await {
                    error!(?err, "push subscribe loop failed");
                }
            });
        }
        {
            let broker = push_broker.clone();
            let coordinator_ref = coordinator.clone();
            coordinator.add(httpapi::SERVER_NAME, move |_timeout| {
                broker.close();
                if let Err(err) = coordinator_ref.done(httpapi::SERVER_NAME) {
                    warn!(?err, "broker shutdown bookkeeping failed");
                }
            })?;
        }

        // 接入层
        let ws_server = Arc::new(WsServer::new(
            WsParameter {
                bind: config.gateway.ws_bind.clone(),
                tls_bind: config.gateway.wss_bind.clone(),
                cert_file: config.gateway.cert_file.clone(),
                key_file: config.gateway.key_file.clone(),
            },
            gateway.clone() as Arc<dyn SessionHandler>,
            serializers.clone(),
        ));
        let ws_addr = ws_server.clone().run().await?;
        {
            let server = ws_server.clone();
            let coordinator_ref = coordinator.clone();
            coordinator.add(ws::SERVER_NAME, move |_timeout| {
                server.close();
                if let Err(err) = coordinator_ref.done(ws::SERVER_NAME) {
                    warn!(?err, "ws shutdown bookkeeping failed");
                }
            })?;
        }

        // 网关本体：退出时关闭全部已注册连接
        {
            let gateway_ref = gateway.clone();
            let coordinator_ref = coordinator.clone();
            coordinator.add(gateway::SERVER_NAME, move |_timeout| {
                tokio::spawn(async move {
                    gateway_ref.close_connections().await;
                    if let Err(err) = coordinator_ref.done(gateway::SERVER_NAME) {
                        warn!(?err, "gateway shutdown bookkeeping failed");
                    }
                });
            })?;
        }

        info!(%ws_addr, %push_addr, "gateway application started");
        Ok(Self {
            ws_addr,
            push_addr,
            coordinator,
            close_grace: Duration::from_secs(config.gateway.close_grace_secs),
        })
    }

    /// 安全退出：广播退出指令并等待宽限期
    pub async fn shutdown(&self) -> Result<()> {
        self.coordinator.close_all(self.close_grace).await
    }
}
