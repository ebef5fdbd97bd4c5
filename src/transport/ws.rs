//! WebSocket 接入服务
//!
//! 每个接入连接一个读循环任务 + 一个写任务；读到的帧经编解码注册表
//! 还原成 `Command` 后交给 `SessionHandler`。明文侦听始终开启，
//! 配置了证书与加密绑定地址时再开第二个加密侦听。

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::protocol::serialize::{SerializerRegistry, plaintext};
use crate::protocol::{self, Command};
use crate::transport::{Connection, ConnectionIdentity, SessionHandler, tls};

/// 服务名
pub const SERVER_NAME: &str = "websocket";

/// WebSocket 服务构造参数
#[derive(Debug, Clone)]
pub struct WsParameter {
    /// 明文服务绑定地址
    pub bind: String,
    /// 加密服务绑定地址（可选）
    pub tls_bind: Option<String>,
    /// 证书文件
    pub cert_file: Option<PathBuf>,
    /// 密钥文件
    pub key_file: Option<PathBuf>,
}

/// WebSocket 服务
pub struct WsServer {
    params: WsParameter,
    handler: Arc<dyn SessionHandler>,
    serializers: Arc<SerializerRegistry>,
    cancel: CancellationToken,
}

impl WsServer {
    pub fn new(
        params: WsParameter,
        handler: Arc<dyn SessionHandler>,
        serializers: Arc<SerializerRegistry>,
    ) -> Self {
        Self {
            params,
            handler,
            serializers,
            cancel: CancellationToken::new(),
        }
    }

    /// 启动侦听，返回明文侦听的实际绑定地址
    pub async fn run(self: Arc<Self>) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.params.bind)
            .await
            .with_context(|| format!("bind ws listener {}", self.params.bind))?;
        let local_addr = listener.local_addr().context("ws listener addr")?;
        info!(addr = %local_addr, "websocket listening");
        Self::spawn_accept_loop(self.clone(), listener, None);

        // 只有证书、密钥与加密绑定地址齐备时才开第二个加密侦听
        match (
            &self.params.tls_bind,
            &self.params.cert_file,
            &self.params.key_file,
        ) {
            (Some(tls_bind), Some(cert_file), Some(key_file)) => {
                let acceptor = tls::acceptor(cert_file, key_file)?;
                let tls_listener = TcpListener::bind(tls_bind)
                    .await
                    .with_context(|| format!("bind wss listener {tls_bind}"))?;
                info!(addr = %tls_listener.local_addr().context("wss listener addr")?,
                    "websocket tls listening");
                Self::spawn_accept_loop(self.clone(), tls_listener, Some(acceptor));
            }
            _ => warn!("wss listener not configured"),
        }
        Ok(local_addr)
    }

    /// 关闭侦听与全部连接读循环
    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn spawn_accept_loop(
        server: Arc<Self>,
        listener: TcpListener,
        acceptor: Option<tokio_rustls::TlsAcceptor>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = server.cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(?err, "accept failed");
                                continue;
                            }
                        };
                        let server = server.clone();
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            match acceptor {
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(tls_stream) => server.handle_socket(tls_stream, peer).await,
                                    Err(err) => debug!(?err, %peer, "tls handshake failed"),
                                },
                                None => server.handle_socket(stream, peer).await,
                            }
                        });
                    }
                }
            }
        });
    }

    async fn handle_socket<S>(self: Arc<Self>, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(err) => {
                debug!(?err, %peer, "websocket upgrade failed");
                return;
            }
        };
        let (mut sink, mut source) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let conn: Arc<WsConnection> = Arc::new(WsConnection::new(
            peer,
            out_tx,
            self.serializers.clone(),
        ));
        debug!(conn = %conn.conn_seq(), %peer, "connection established");
        self.handler.on_new_connection(conn.clone()).await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = conn.closed.cancelled() => break,
                incoming = source.next() => {
                    let msg = match incoming {
                        None => break,
                        Some(Err(err)) => {
                            debug!(?err, conn = %conn.conn_seq(), "read failed");
                            break;
                        }
                        Some(Ok(msg)) => msg,
                    };
                    match msg {
                        Message::Text(text) => {
                            if !self.dispatch_frame(&conn, text.as_bytes()).await {
                                break;
                            }
                        }
                        Message::Binary(_) => {
                            // 二进制帧不在协议内
                            warn!(conn = %conn.conn_seq(), "binary frame unsupported");
                            break;
                        }
                        Message::Close(_) => break,
                        // Ping/Pong 由 tungstenite 自动应答
                        _ => {}
                    }
                }
            }
        }

        conn.close(false).await;
        debug!(conn = %conn.conn_seq(), "connection closed");
        self.handler.on_close_connection(conn).await;
    }

    /// 返回 `false` 时读循环终止
    async fn dispatch_frame(&self, conn: &Arc<WsConnection>, frame: &[u8]) -> bool {
        let cmd = match self.serializers.parse(frame) {
            Ok(cmd) => cmd,
            Err(err) => {
                warn!(?err, conn = %conn.conn_seq(), "malformed frame");
                return false;
            }
        };
        conn.set_wire_version(&cmd.version);

        if cmd.first_part_name() == protocol::HEART_BEAT {
            let response = Command {
                version: conn.wire_version(),
                app_id: cmd.app_id.clone(),
                name: protocol::HEART_BEAT_RESPONSE.to_string(),
                data: None,
                payload: Vec::new(),
            };
            if let Err(err) = conn.send(&response).await {
                warn!(?err, conn = %conn.conn_seq(), "heartbeat response failed");
            }
            return true;
        }

        let conn_dyn: Arc<dyn Connection> = conn.clone();
        if let Err(err) = self.handler.on_received_command(conn_dyn, cmd).await {
            warn!(?err, conn = %conn.conn_seq(), "command handling failed");
            conn.close(true).await;
            return false;
        }
        true
    }
}

/// WebSocket 连接
pub struct WsConnection {
    seq: String,
    peer: SocketAddr,
    out_tx: mpsc::Sender<Message>,
    serializers: Arc<SerializerRegistry>,
    identity: RwLock<Option<ConnectionIdentity>>,
    login: AtomicBool,
    wire_version: RwLock<String>,
    closed: CancellationToken,
}

impl WsConnection {
    pub fn new(
        peer: SocketAddr,
        out_tx: mpsc::Sender<Message>,
        serializers: Arc<SerializerRegistry>,
    ) -> Self {
        Self {
            seq: Uuid::new_v4().to_string(),
            peer,
            out_tx,
            serializers,
            identity: RwLock::new(None),
            login: AtomicBool::new(false),
            wire_version: RwLock::new(plaintext::VERSION.to_string()),
            closed: CancellationToken::new(),
        }
    }

    fn set_wire_version(&self, version: &str) {
        if !version.is_empty() {
            *self.wire_version.write().expect("wire version poisoned") = version.to_string();
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn conn_seq(&self) -> &str {
        &self.seq
    }

    fn identity(&self) -> Option<ConnectionIdentity> {
        self.identity.read().expect("identity poisoned").clone()
    }

    fn is_login(&self) -> bool {
        self.login.load(Ordering::SeqCst)
    }

    fn login_success(&self, app_id: &str, user_id: &str, device_id: &str) {
        *self.identity.write().expect("identity poisoned") = Some(ConnectionIdentity {
            app_id: app_id.to_string(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
        });
        self.login.store(true, Ordering::SeqCst);
    }

    fn wire_version(&self) -> String {
        self.wire_version.read().expect("wire version poisoned").clone()
    }

    fn remote_addr(&self) -> String {
        self.peer.to_string()
    }

    async fn send(&self, cmd: &Command) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(GatewayError::ConnectionClosed);
        }
        // 出站统一按连接协商的格式编码
        let mut outgoing = cmd.clone();
        outgoing.version = self.wire_version();
        let bytes = self.serializers.compose(&outgoing)?;
        let message = match String::from_utf8(bytes) {
            Ok(text) => Message::Text(text),
            Err(raw) => Message::Binary(raw.into_bytes()),
        };
        self.out_tx
            .send(message)
            .await
            .map_err(|_| GatewayError::ConnectionClosed)
    }

    async fn close(&self, force: bool) {
        if self.closed.is_cancelled() {
            return;
        }
        if force {
            error!(conn = %self.seq, peer = %self.peer, "connection force closed");
        }
        let _ = self.out_tx.send(Message::Close(None)).await;
        self.closed.cancel();
    }
}

impl std::fmt::Display for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "websocket[{}]", self.peer)
    }
}
