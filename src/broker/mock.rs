//! 模拟 Broker，用于测试
//!
//! 发布按脚本回应并记录调用；订阅把投递交给测试侧手动驱动。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::broker::{Broker, SubscribeHandler};
use crate::error::{GatewayError, Result};
use crate::protocol::Command;

/// 模拟 Broker
pub struct MockBroker {
    inner: Mutex<Inner>,
    delivery_tx: mpsc::UnboundedSender<(String, Command)>,
    delivery_rx: Mutex<Option<mpsc::UnboundedReceiver<(String, Command)>>>,
}

struct Inner {
    /// 预置的发布响应，按序弹出
    responses: VecDeque<Result<Option<Command>>>,
    /// 记录的发布调用
    published: Vec<(String, Command)>,
}

impl MockBroker {
    pub fn new() -> Self {
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                responses: VecDeque::new(),
                published: Vec::new(),
            }),
            delivery_tx,
            delivery_rx: Mutex::new(Some(delivery_rx)),
        }
    }

    /// 预置下一次发布的响应
    pub fn push_response(&self, response: Result<Option<Command>>) {
        self.inner
            .lock()
            .expect("mock broker poisoned")
            .responses
            .push_back(response);
    }

    /// 取出记录的发布调用
    pub fn published(&self) -> Vec<(String, Command)> {
        self.inner
            .lock()
            .expect("mock broker poisoned")
            .published
            .clone()
    }

    /// 向订阅循环投递一条信令
    pub fn deliver(&self, tag: &str, cmd: Command) {
        let _ = self.delivery_tx.send((tag.to_string(), cmd));
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn publish(&self, tag: &str, cmd: &Command) -> Result<Option<Command>> {
        let mut inner = self.inner.lock().expect("mock broker poisoned");
        inner.published.push((tag.to_string(), cmd.clone()));
        inner
            .responses
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn subscribe(&self, tag: &str, handler: Arc<dyn SubscribeHandler>) -> Result<()> {
        let mut rx = self
            .delivery_rx
            .lock()
            .expect("mock broker poisoned")
            .take()
            .ok_or_else(|| {
                GatewayError::InvalidParameter("mock broker already subscribed".to_string())
            })?;
        while let Some((delivered_tag, cmd)) = rx.recv().await {
            if delivered_tag == tag {
                let _ = handler.handle(tag, cmd).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc as test_mpsc;

    struct Collect(test_mpsc::UnboundedSender<Command>);

    #[async_trait]
    impl SubscribeHandler for Collect {
        async fn handle(&self, _tag: &str, cmd: Command) -> Result<()> {
            let _ = self.0.send(cmd);
            Ok(())
        }
    }

    #[tokio::test]
    async fn deliver_drives_the_subscribe_loop() {
        let broker = Arc::new(MockBroker::new());
        let (tx, mut rx) = test_mpsc::unbounded_channel();
        {
            let broker = broker.clone();
            tokio::spawn(async move {
                let _ = broker.subscribe("push", Arc::new(Collect(tx))).await;
            });
        }

        let cmd = Command {
            name: "p2u".to_string(),
            ..Default::default()
        };
        broker.deliver("other-tag", cmd.clone());
        broker.deliver("push", cmd);

        let received = rx.recv().await.expect("delivered");
        assert_eq!(received.name, "p2u");
    }

    #[tokio::test]
    async fn scripted_responses_pop_in_order() {
        let broker = MockBroker::new();
        broker.push_response(Ok(Some(Command {
            name: "close".to_string(),
            ..Default::default()
        })));

        let cmd = Command::default();
        let first = broker.publish("gateway", &cmd).await.expect("first");
        assert_eq!(first.expect("scripted response").name, "close");
        let second = broker.publish("gateway", &cmd).await.expect("second");
        assert!(second.is_none(), "exhausted script falls back to no response");
        assert_eq!(broker.published().len(), 2);
    }
}
