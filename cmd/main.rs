use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use flare_tenant_gateway::config::AppConfig;
use flare_tenant_gateway::error::GatewayError;
use flare_tenant_gateway::{GatewayApplication, logging};

#[derive(Parser)]
#[command(name = "flare-tenant-gateway", version, about = "多租户信令网关")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动网关服务
    Gateway {
        /// TOML 配置文件
        #[arg(long)]
        config: Option<PathBuf>,
        /// 明文接入绑定地址
        #[arg(long = "ws-bind")]
        ws_bind: Option<String>,
        /// 加密接入绑定地址
        #[arg(long = "wss-bind")]
        wss_bind: Option<String>,
        /// 推送服务绑定地址
        #[arg(long = "push-bind")]
        push_bind: Option<String>,
        /// 租户配置文件（可重复）
        #[arg(long = "app-config")]
        app_configs: Vec<PathBuf>,
        /// 证书文件路径
        #[arg(long = "wss-cert-file")]
        cert_file: Option<PathBuf>,
        /// 密钥文件路径
        #[arg(long = "wss-key-file")]
        key_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Gateway {
            config,
            ws_bind,
            wss_bind,
            push_bind,
            app_configs,
            cert_file,
            key_file,
        } => {
            let mut app_config = match config {
                Some(path) => AppConfig::load(&path)?,
                None => AppConfig::default(),
            };
            if let Some(bind) = ws_bind {
                app_config.gateway.ws_bind = bind;
            }
            if wss_bind.is_some() {
                app_config.gateway.wss_bind = wss_bind;
            }
            if let Some(bind) = push_bind {
                app_config.gateway.push_bind = bind;
            }
            if !app_configs.is_empty() {
                app_config.gateway.app_configs = app_configs;
            }
            if cert_file.is_some() {
                app_config.gateway.cert_file = cert_file;
            }
            if key_file.is_some() {
                app_config.gateway.key_file = key_file;
            }

            run_gateway(app_config).await
        }
    }
}

async fn run_gateway(config: AppConfig) -> Result<()> {
    let application = GatewayApplication::start(config).await?;

    wait_for_termination().await;
    info!("termination signal received, closing");

    match application.shutdown().await {
        Ok(()) => info!("gateway closed"),
        Err(GatewayError::CloseTimeout) => {
            // 只做检测不强杀，残留子系统由进程退出回收
            error!("close timeout, some subsystems did not finish in time");
        }
        Err(err) => warn!(?err, "shutdown reported error"),
    }
    Ok(())
}

/// 等待 SIGHUP / SIGINT / SIGTERM / SIGQUIT 之一
async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
    let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut quit = signal(SignalKind::quit()).expect("install SIGQUIT handler");

    tokio::select! {
        _ = hangup.recv() => {}
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
        _ = quit.recv() => {}
    }
}
