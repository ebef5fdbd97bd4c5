//! HTTP API 实现的 Broker
//!
//! 发布侧：对目标地址 `{request_url}/{tag}` 发 POST，负载走请求体，
//! 信令与签名走请求头；订阅侧：HTTP 服务按路径末段取 tag，校验签名后
//! 入队即回 200（确认语义是"已接收待投递"，不是"已处理"）。

pub mod headers;

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use dashmap::DashMap;
use futures::FutureExt as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, SubscribeHandler};
use crate::error::{GatewayError, Result};
use crate::protocol::Command;
use crate::protocol::serialize::SerializerRegistry;
use crate::tenant::AppDirectory;
use crate::util;

/// 服务名
pub const SERVER_NAME: &str = "broker-httpapi";
/// 默认队列长度
pub const DEFAULT_QUEUE_SIZE: usize = 1000;
/// 最小队列长度，小于它时退回默认值
pub const MIN_QUEUE_SIZE: usize = 64;
/// 默认重放窗口（单位秒）
pub const DEFAULT_REPLAY_WINDOW_SECS: i64 = 300;
/// 默认请求超时（单位秒）
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP API Broker
pub struct HttpApiBroker {
    /// 发布请求地址
    request_url: String,
    apps: Arc<AppDirectory>,
    serializers: Arc<SerializerRegistry>,
    client: reqwest::Client,
    /// 每个 tag 一条有界投递队列（首次订阅时创建）
    queues: DashMap<String, mpsc::Sender<Command>>,
    queue_size: usize,
    replay_window_secs: i64,
    cancel: CancellationToken,
}

impl HttpApiBroker {
    pub fn new(
        request_url: impl Into<String>,
        apps: Arc<AppDirectory>,
        serializers: Arc<SerializerRegistry>,
        queue_size: usize,
        replay_window_secs: i64,
        request_timeout_secs: u64,
    ) -> Result<Self> {
        let queue_size = if queue_size < MIN_QUEUE_SIZE {
            DEFAULT_QUEUE_SIZE
        } else {
            queue_size
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .context("build http client")?;
        let request_url: String = request_url.into();
        Ok(Self {
            request_url: request_url.trim_end_matches('/').to_string(),
            apps,
            serializers,
            client,
            queues: DashMap::new(),
            queue_size,
            replay_window_secs,
            cancel: CancellationToken::new(),
        })
    }

    /// 仅发布用的 broker（不绑定订阅服务）
    pub fn publisher(
        request_url: impl Into<String>,
        apps: Arc<AppDirectory>,
        serializers: Arc<SerializerRegistry>,
        request_timeout_secs: u64,
    ) -> Result<Self> {
        Self::new(
            request_url,
            apps,
            serializers,
            DEFAULT_QUEUE_SIZE,
            DEFAULT_REPLAY_WINDOW_SECS,
            request_timeout_secs,
        )
    }

    /// 启动订阅侧 HTTP 服务，返回实际绑定地址
    pub async fn run(self: Arc<Self>, bind: SocketAddr) -> Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind broker listener {bind}"))?;
        let local_addr = listener.local_addr().context("broker listener addr")?;
        info!(addr = %local_addr, "broker httpapi listening");

        let app = Router::new()
            .route("/:tag", post(ingest))
            .with_state(self.clone());
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(?err, "broker httpapi server failed");
            }
        });
        Ok(local_addr)
    }

    /// 关闭订阅服务与全部订阅循环
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl Broker for HttpApiBroker {
    async fn publish(&self, tag: &str, cmd: &Command) -> Result<Option<Command>> {
        debug!(tag, name = %cmd.name, "broker publish");
        let mut request = self
            .client
            .post(format!("{}/{}", self.request_url, tag))
            .header("User-Agent", env!("CARGO_PKG_NAME"))
            .body(cmd.payload.clone());
        for (name, value) in headers::sign(&self.apps, tag, cmd)? {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|err| GatewayError::Other(anyhow!("broker publish failed: {err}")))?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(GatewayError::Other(anyhow!(
                "http response status {}",
                response.status().as_u16()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::Other(anyhow!("read broker response: {err}")))?;
        if body.is_empty() {
            return Ok(None);
        }
        match self.serializers.parse(&body) {
            Ok(resp) => Ok(Some(resp)),
            Err(err) => {
                // 响应体不是合法信令时按"无响应"处理，调用方不中断
                warn!(?err, tag, "discard undecodable broker response");
                Ok(None)
            }
        }
    }

    async fn subscribe(&self, tag: &str, handler: Arc<dyn SubscribeHandler>) -> Result<()> {
        let tag = tag.to_lowercase();
        let (tx, mut rx) = mpsc::channel::<Command>(self.queue_size);
        if self.queues.contains_key(&tag) {
            return Err(GatewayError::InvalidParameter(format!(
                "tag {tag} already subscribed"
            )));
        }
        self.queues.insert(tag.clone(), tx);
        info!(%tag, "broker subscribe");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = rx.recv() => {
                    let Some(cmd) = received else { break };
                    let name = cmd.name.clone();
                    // 单次回调隔离 panic，一次失败不影响订阅循环
                    let outcome = AssertUnwindSafe(handler.handle(&tag, cmd))
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!(?err, %tag, %name, "subscriber handler failed"),
                        Err(_) => error!(%tag, %name, "subscriber handler panicked"),
                    }
                }
            }
        }
        self.queues.remove(&tag);
        info!(%tag, "broker subscribe loop stopped");
        Ok(())
    }
}

/// 订阅侧 HTTP 入口：校验签名，入队即确认
async fn ingest(
    State(broker): State<Arc<HttpApiBroker>>,
    Path(tag): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let tag = tag.trim_matches('/').to_lowercase();
    let Some(sender) = broker.queues.get(&tag).map(|entry| entry.value().clone()) else {
        warn!(%tag, "ingest for unknown tag");
        return StatusCode::NOT_FOUND;
    };

    let cmd = match headers::verify(
        &broker.apps,
        &tag,
        &headers,
        &body,
        broker.replay_window_secs,
        util::unix_now(),
    ) {
        Ok(cmd) => cmd,
        Err(err) => {
            warn!(?err, %tag, "ingest rejected");
            return StatusCode::BAD_REQUEST;
        }
    };

    // 队列满时在这里阻塞，对上游形成背压
    if sender.send(cmd).await.is_err() {
        warn!(%tag, "delivery queue closed");
        return StatusCode::NOT_FOUND;
    }
    StatusCode::OK
}
