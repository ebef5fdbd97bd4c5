//! 网关配置
//!
//! TOML 配置文件 + 命令行覆盖；租户定义在独立的 JSON 文件里，
//! 由 `[gateway] app-config` 引用。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

use crate::broker::httpapi;
use crate::error::Result;
use crate::gateway;

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

/// 网关服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// 明文接入绑定地址
    #[serde(rename = "ws-bind", default = "default_ws_bind")]
    pub ws_bind: String,
    /// 加密接入绑定地址（可选）
    #[serde(rename = "wss-bind", default)]
    pub wss_bind: Option<String>,
    /// 证书文件
    #[serde(rename = "wss-cert-file", default)]
    pub cert_file: Option<PathBuf>,
    /// 密钥文件
    #[serde(rename = "wss-key-file", default)]
    pub key_file: Option<PathBuf>,
    /// 推送（broker 订阅侧）绑定地址
    #[serde(rename = "push-bind", default = "default_push_bind")]
    pub push_bind: String,
    /// 租户配置文件
    #[serde(rename = "app-config", default)]
    pub app_configs: Vec<PathBuf>,
    /// 登录时间戳有效窗口（单位秒）
    #[serde(rename = "login-timeout-secs", default = "default_login_timeout")]
    pub login_timeout_secs: i64,
    /// 转发时使用的发布 tag
    #[serde(rename = "publish-tag", default = "default_publish_tag")]
    pub publish_tag: String,
    /// 网关自身订阅的推送 tag
    #[serde(rename = "push-tag", default = "default_push_tag")]
    pub push_tag: String,
    /// 安全退出宽限期（单位秒）
    #[serde(rename = "close-grace-secs", default = "default_close_grace")]
    pub close_grace_secs: u64,
}

/// broker 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// 投递队列长度
    #[serde(rename = "queue-size", default = "default_queue_size")]
    pub queue_size: usize,
    /// 签名重放窗口（单位秒）
    #[serde(rename = "replay-window-secs", default = "default_replay_window")]
    pub replay_window_secs: i64,
    /// 发布请求超时（单位秒）
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_ws_bind() -> String {
    "0.0.0.0:8870".to_string()
}

fn default_push_bind() -> String {
    "0.0.0.0:8871".to_string()
}

fn default_login_timeout() -> i64 {
    gateway::DEFAULT_LOGIN_TIMEOUT_SECS
}

fn default_publish_tag() -> String {
    gateway::DEFAULT_PUBLISH_TAG.to_string()
}

fn default_push_tag() -> String {
    "push".to_string()
}

fn default_close_grace() -> u64 {
    10
}

fn default_queue_size() -> usize {
    httpapi::DEFAULT_QUEUE_SIZE
}

fn default_replay_window() -> i64 {
    httpapi::DEFAULT_REPLAY_WINDOW_SECS
}

fn default_request_timeout() -> u64 {
    httpapi::DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_bind: default_ws_bind(),
            wss_bind: None,
            cert_file: None,
            key_file: None,
            push_bind: default_push_bind(),
            app_configs: Vec::new(),
            login_timeout_secs: default_login_timeout(),
            publish_tag: default_publish_tag(),
            push_tag: default_push_tag(),
            close_grace_secs: default_close_grace(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            replay_window_secs: default_replay_window(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl AppConfig {
    /// 从 TOML 文件载入配置
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("decode config {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config: AppConfig = toml::from_str("").expect("empty config");
        assert_eq!(config.gateway.ws_bind, "0.0.0.0:8870");
        assert_eq!(config.gateway.login_timeout_secs, 3600);
        assert_eq!(config.gateway.publish_tag, "gateway");
        assert_eq!(config.broker.queue_size, 1000);
        assert_eq!(config.broker.replay_window_secs, 300);
        assert!(config.gateway.wss_bind.is_none());
    }

    #[test]
    fn kebab_case_keys_are_honored() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
[gateway]
ws-bind = "127.0.0.1:9000"
push-bind = "127.0.0.1:9001"
app-config = ["apps/test.json"]
publish-tag = "edge"

[broker]
queue-size = 128
replay-window-secs = 60
"#
        )
        .expect("write config");

        let config = AppConfig::load(file.path()).expect("load");
        assert_eq!(config.gateway.ws_bind, "127.0.0.1:9000");
        assert_eq!(config.gateway.app_configs.len(), 1);
        assert_eq!(config.gateway.publish_tag, "edge");
        assert_eq!(config.broker.queue_size, 128);
        assert_eq!(config.broker.replay_window_secs, 60);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: std::result::Result<AppConfig, _> =
            toml::from_str("[gateway]\nunknown-key = 1\n");
        assert!(result.is_err());
    }
}
