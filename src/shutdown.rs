//! 安全退出协调器
//!
//! 各长驻子系统按名字注册，收到退出指令后在限定时间内自行收尾；
//! `close_all` 只做超时检测，不强杀仍在运行的子系统。

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::error::{GatewayError, Result};

/// 安全退出控制开关
pub struct ShutdownCoordinator {
    inner: Mutex<Inner>,
    pending_tx: watch::Sender<usize>,
    close_flag: AtomicBool,
}

struct Inner {
    signals: HashMap<String, mpsc::Sender<Duration>>,
}

impl ShutdownCoordinator {
    /// 新建安全退出控制开关
    pub fn new() -> Self {
        let (pending_tx, _) = watch::channel(0usize);
        Self {
            inner: Mutex::new(Inner {
                signals: HashMap::new(),
            }),
            pending_tx,
            close_flag: AtomicBool::new(false),
        }
    }

    /// 添加控制项：注册侦听任务，退出指令到达时回调 `on_close(timeout)`
    ///
    /// 同名重复注册是错误。
    pub fn add<F>(&self, name: &str, on_close: F) -> Result<()>
    where
        F: FnOnce(Duration) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Duration>(1);
        {
            let mut inner = self.inner.lock().expect("shutdown registry poisoned");
            if inner.signals.contains_key(name) {
                return Err(GatewayError::InvalidParameter(format!(
                    "subsystem {name} already registered"
                )));
            }
            inner.signals.insert(name.to_string(), tx);
        }
        self.pending_tx.send_modify(|count| *count += 1);

        let name = name.to_string();
        tokio::spawn(async move {
            if let Some(timeout) = rx.recv().await {
                info!(subsystem = %name, "subsystem asked to close");
                on_close(timeout);
            }
        });
        Ok(())
    }

    /// 控制项已安全退出
    ///
    /// 对未注册（或已完成）的名字调用是错误。
    pub fn done(&self, name: &str) -> Result<()> {
        let removed = {
            let mut inner = self.inner.lock().expect("shutdown registry poisoned");
            inner.signals.remove(name)
        };
        if removed.is_none() {
            return Err(GatewayError::InvalidParameter(format!(
                "subsystem {name} not registered"
            )));
        }
        self.pending_tx.send_modify(|count| *count -= 1);
        info!(subsystem = %name, "subsystem done");
        Ok(())
    }

    /// 是否已进入退出流程
    pub fn is_closed(&self) -> bool {
        self.close_flag.load(Ordering::SeqCst)
    }

    /// 开始安全退出：异步广播退出指令，等待全部控制项完成或超时
    pub async fn close_all(&self, timeout: Duration) -> Result<()> {
        self.close_flag.store(true, Ordering::SeqCst);

        let senders: Vec<(String, mpsc::Sender<Duration>)> = {
            let inner = self.inner.lock().expect("shutdown registry poisoned");
            inner
                .signals
                .iter()
                .map(|(name, tx)| (name.clone(), tx.clone()))
                .collect()
        };
        tokio::spawn(async move {
            for (name, tx) in senders {
                if tx.send(timeout).await.is_err() {
                    warn!(subsystem = %name, "close signal dropped");
                }
            }
        });

        let mut pending_rx = self.pending_tx.subscribe();
        let drained = tokio::time::timeout(timeout, async {
            loop {
                if *pending_rx.borrow_and_update() == 0 {
                    return;
                }
                if pending_rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!("all subsystems closed");
                Ok(())
            }
            Err(_) => Err(GatewayError::CloseTimeout),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn duplicate_registration_is_an_error() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.add("gateway", |_| {}).expect("first add");
        assert!(coordinator.add("gateway", |_| {}).is_err());
    }

    #[tokio::test]
    async fn done_twice_is_an_error() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.add("gateway", |_| {}).expect("add");
        coordinator.done("gateway").expect("first done");
        assert!(coordinator.done("gateway").is_err());
        assert!(coordinator.done("never-registered").is_err());
    }

    #[tokio::test]
    async fn close_all_waits_for_participants() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let worker = coordinator.clone();
        coordinator
            .add("worker", move |_| {
                // 模拟子系统在回调里完成收尾
                let _ = worker.done("worker");
            })
            .expect("add");

        coordinator
            .close_all(Duration::from_secs(2))
            .await
            .expect("clean close");
        assert!(coordinator.is_closed());
    }

    #[tokio::test]
    async fn stuck_subsystem_triggers_close_timeout() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.add("stuck", |_| {}).expect("add");

        let started = Instant::now();
        let err = coordinator
            .close_all(Duration::from_secs(1))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, GatewayError::CloseTimeout));
        assert!(elapsed >= Duration::from_millis(900), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "returned too late: {elapsed:?}");
    }
}
