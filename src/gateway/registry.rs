//! 连接注册表
//!
//! 组合标识 `app_id#user_id` → 该用户的设备连接列表。
//! 粗粒度互斥锁只保护表结构；任何套接字 I/O（发送、关闭）都必须在
//! 释放锁之后进行，调用方拿快照出去再操作。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::transport::{Connection, connection_id};

/// 连接注册表
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Vec<Arc<dyn Connection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册已登录连接
    ///
    /// 同一 `(app, user, device)` 最多保留一条活连接；被顶替的旧连接
    /// 返回给调用方，由调用方在锁外关闭。
    pub fn insert(&self, conn: Arc<dyn Connection>) -> Option<Arc<dyn Connection>> {
        let identity = conn.identity()?;
        let key = identity.composite_id();
        let mut connections = self.connections.lock().expect("registry poisoned");
        let entries = connections.entry(key).or_default();
        for entry in entries.iter_mut() {
            let same_device = entry
                .identity()
                .is_some_and(|other| other.device_id == identity.device_id);
            if same_device {
                let old = std::mem::replace(entry, conn);
                return Some(old);
            }
        }
        entries.push(conn);
        None
    }

    /// 注销连接；重复调用或未注册时是空操作
    pub fn remove(&self, conn: &Arc<dyn Connection>) -> bool {
        let Some(identity) = conn.identity() else {
            return false;
        };
        let key = identity.composite_id();
        let mut connections = self.connections.lock().expect("registry poisoned");
        let Some(entries) = connections.get_mut(&key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.conn_seq() != conn.conn_seq());
        let removed = entries.len() != before;
        if entries.is_empty() {
            connections.remove(&key);
        }
        removed
    }

    /// 指定用户集合的连接快照
    pub fn snapshot_users<'a, I>(&self, app_id: &str, user_ids: I) -> Vec<Arc<dyn Connection>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let connections = self.connections.lock().expect("registry poisoned");
        let mut snapshot = Vec::new();
        for user_id in user_ids {
            if let Some(entries) = connections.get(&connection_id(app_id, user_id)) {
                snapshot.extend(entries.iter().cloned());
            }
        }
        snapshot
    }

    /// 租户全量连接快照（`*` 推送目标）
    pub fn snapshot_app(&self, app_id: &str) -> Vec<Arc<dyn Connection>> {
        let prefix = format!("{app_id}#");
        let connections = self.connections.lock().expect("registry poisoned");
        connections
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .flat_map(|(_, entries)| entries.iter().cloned())
            .collect()
    }

    /// 取出全部连接并清空注册表（退出时关闭用）
    pub fn drain(&self) -> Vec<Arc<dyn Connection>> {
        let mut connections = self.connections.lock().expect("registry poisoned");
        connections.drain().flat_map(|(_, entries)| entries).collect()
    }

    /// 活连接数
    pub fn len(&self) -> usize {
        let connections = self.connections.lock().expect("registry poisoned");
        connections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
