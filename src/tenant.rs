//! 租户（App）模型
//!
//! 每个租户一个 JSON 配置文件，载入后不可变；
//! 密钥同时用于客户端登录 Token 与 broker HTTP 签名。

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use serde::Deserialize;
use tracing::info;

use crate::error::Result;
use crate::router::RouteMap;
use crate::util;

/// 租户数据
#[derive(Debug, Clone)]
pub struct App {
    /// 租户ID
    pub id: String,
    /// 共享密钥
    pub key: String,
    /// 是否校验登录 Token
    pub token_check: bool,
}

/// 租户配置文件
#[derive(Debug, Deserialize)]
struct AppFile {
    id: String,
    key: String,
    #[serde(rename = "token-check", default)]
    token_check: bool,
    #[serde(default)]
    router: RouteMap,
}

impl App {
    pub fn new(id: impl Into<String>, key: impl Into<String>, token_check: bool) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            token_check,
        }
    }

    fn key_bytes(&self) -> &[u8] {
        self.key.as_bytes()
    }

    /// 带密钥 SHA256 摘要
    pub fn checksum_sha256(&self, fields: &[&[u8]]) -> String {
        util::checksum_sha256_with_key(self.key_bytes(), fields)
    }

    /// 带密钥 SHA1 摘要
    pub fn checksum_sha1(&self, fields: &[&[u8]]) -> String {
        util::checksum_sha1_with_key(self.key_bytes(), fields)
    }

    /// 带密钥 MD5 摘要
    pub fn checksum_md5(&self, fields: &[&[u8]]) -> String {
        util::checksum_md5_with_key(self.key_bytes(), fields)
    }

    /// 登录 Token：`hex_upper(MD5(key ‖ user_id ‖ device_id ‖ timestamp))`
    pub fn login_token(&self, user_id: &str, device_id: &str, timestamp: i64) -> String {
        self.checksum_md5(&[
            user_id.as_bytes(),
            device_id.as_bytes(),
            timestamp.to_string().as_bytes(),
        ])
    }
}

/// 租户目录
#[derive(Default)]
pub struct AppDirectory {
    apps: HashMap<String, Arc<App>>,
}

impl AppDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从一组 JSON 配置文件载入租户，同时带出各租户的路由表
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<(Self, HashMap<String, RouteMap>)> {
        let mut directory = Self::new();
        let mut route_maps = HashMap::new();
        for path in paths {
            let path = path.as_ref();
            let file = File::open(path)
                .with_context(|| format!("open app config {}", path.display()))?;
            let parsed: AppFile = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("decode app config {}", path.display()))?;
            info!(app_id = %parsed.id, config = %path.display(), "app loaded");
            route_maps.insert(parsed.id.clone(), parsed.router);
            directory.insert(App::new(parsed.id, parsed.key, parsed.token_check));
        }
        Ok((directory, route_maps))
    }

    pub fn insert(&mut self, app: App) {
        self.apps.insert(app.id.clone(), Arc::new(app));
    }

    pub fn get(&self, app_id: &str) -> Option<Arc<App>> {
        self.apps.get(app_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn login_token_is_deterministic_and_case_stable() {
        let app = App::new("test", "1234567890", true);
        let a = app.login_token("123", "web", 1234567);
        let b = app.login_token("123", "web", 1234567);
        assert_eq!(a, b);
        assert_eq!(a, a.to_uppercase());
        // 任一输入变化都应改变 Token
        assert_ne!(a, app.login_token("124", "web", 1234567));
        assert_ne!(a, app.login_token("123", "ios", 1234567));
        assert_ne!(a, app.login_token("123", "web", 1234568));
        assert_ne!(a, App::new("test", "other-key", true).login_token("123", "web", 1234567));
    }

    #[test]
    fn keyed_checksums_depend_on_the_app_key() {
        let app = App::new("test", "secret", true);
        let other = App::new("test", "another", true);
        assert_eq!(app.checksum_sha1(&[b"x"]).len(), 40);
        assert_eq!(app.checksum_sha256(&[b"x"]).len(), 64);
        assert_ne!(app.checksum_sha1(&[b"x"]), other.checksum_sha1(&[b"x"]));
        assert_ne!(app.checksum_md5(&[b"x"]), other.checksum_md5(&[b"x"]));
    }

    #[test]
    fn directory_loads_json_files() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"id":"test","key":"secret","token-check":true,
                "router":{{"*":{{"protocol":"httpapi","parameter":"http://127.0.0.1:8880"}}}}}}"#
        )
        .expect("write config");

        let (directory, route_maps) = AppDirectory::load(&[file.path()]).expect("load");
        let app = directory.get("test").expect("app present");
        assert_eq!(app.key, "secret");
        assert!(app.token_check);
        assert!(route_maps["test"].contains_key("*"));
        assert!(directory.get("missing").is_none());
    }
}
