//! 信令路由
//!
//! 按信令名前缀把命令路由到某个 broker。路由配置格式（租户配置内嵌）：
//! `{"<信令名前缀>":{"protocol":"httpapi","parameter":"http://xxx/api"}}`
//! `*` 为缺省路由；最长前缀优先。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::broker::Broker;
use crate::error::{GatewayError, Result};

/// 最简单的路由信息
#[derive(Debug, Clone, Deserialize)]
pub struct RouteInfo {
    pub protocol: String,
    pub parameter: String,
}

/// 路由信息表：信令名前缀 → 路由信息
pub type RouteMap = HashMap<String, RouteInfo>;

/// httpapi 调用类型的名称
pub const PROTOCOL_HTTPAPI: &str = "httpapi";

/// 路由接口
pub trait RouteTable: Send + Sync {
    /// 查询路由，未命中返回 `None`
    fn find(&self, name: &str) -> Option<Arc<dyn Broker>>;
}

/// 前缀匹配路由表
pub struct PrefixRouter {
    default_route: Option<Arc<dyn Broker>>,
    // 按前缀长度降序，保证最长前缀优先
    routes: Vec<(String, Arc<dyn Broker>)>,
}

impl std::fmt::Debug for PrefixRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixRouter")
            .field("default_route", &self.default_route.is_some())
            .field(
                "routes",
                &self.routes.iter().map(|(p, _)| p).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PrefixRouter {
    /// 从路由信息表构建；`build` 负责为 `parameter` 创建 broker 句柄
    pub fn from_map<F>(map: &RouteMap, mut build: F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<Arc<dyn Broker>>,
    {
        let mut default_route = None;
        let mut routes = Vec::new();
        for (prefix, info) in map {
            if info.protocol != PROTOCOL_HTTPAPI {
                return Err(GatewayError::UnsupportedProtocol);
            }
            let broker = build(&info.parameter)?;
            if prefix == "*" {
                default_route = Some(broker);
            } else {
                routes.push((prefix.clone(), broker));
            }
        }
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(Self {
            default_route,
            routes,
        })
    }

    /// 空路由表（查不到任何路由）
    pub fn empty() -> Self {
        Self {
            default_route: None,
            routes: Vec::new(),
        }
    }
}

impl RouteTable for PrefixRouter {
    fn find(&self, name: &str) -> Option<Arc<dyn Broker>> {
        for (prefix, broker) in &self.routes {
            if name == prefix || name.starts_with(&format!("{prefix}/")) {
                return Some(broker.clone());
            }
        }
        self.default_route.clone()
    }
}
