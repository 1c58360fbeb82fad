//! 部署状态通知中心
//!
//! 部署 ID -> 观察者集合的显式注册表。
//!
//! - 每个部署一个 topic，`publish` 在 topic 的投递锁内逐个回调，保证每个观察者看到的顺序与发布顺序一致
//! - 不回放历史：订阅之后的发布才会收到
//! - `Subscription` 被 drop 或调用 `unsubscribe()` 时移除对应观察者，可重复调用
//! - `finish` 之后且观察者全部退订，topic 被回收；从未发布过的 topic 在最后一个观察者退订时即回收

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::deploy::Deployment;

type Observer = Arc<dyn Fn(&Deployment) + Send + Sync>;

/// 单个部署的观察者集合
#[derive(Default)]
struct Topic {
    observers: Mutex<Vec<(u64, Observer)>>,
    /// 串行化同一部署的投递
    delivery: Mutex<()>,
    /// 至少发布过一次
    published: AtomicBool,
    finished: AtomicBool,
}

impl Topic {
    fn is_empty(&self) -> bool {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// 已结束，或从未发布过（例如订阅了已结束或不存在的部署），且没有观察者
    fn is_reclaimable(&self) -> bool {
        let idle = self.finished.load(Ordering::Acquire) || !self.published.load(Ordering::Acquire);
        idle && self.is_empty()
    }
}

struct HubInner {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    next_id: AtomicU64,
}

impl HubInner {
    fn topic(&self, deployment_id: &str) -> Option<Arc<Topic>> {
        self.topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(deployment_id)
            .cloned()
    }

    fn remove_observer(&self, deployment_id: &str, observer_id: u64) {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let reclaim = match topics.get(deployment_id) {
            Some(topic) => {
                topic
                    .observers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .retain(|(id, _)| *id != observer_id);
                topic.is_reclaimable()
            }
            None => false,
        };
        if reclaim {
            topics.remove(deployment_id);
            debug!(deployment_id, "Notification topic reclaimed");
        }
    }
}

/// 通知中心
///
/// 克隆开销很小，内部共享同一注册表
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 订阅部署状态
    ///
    /// 返回的 `Subscription` 被 drop 时自动退订。
    ///
    /// 观察者在该部署的投递锁内同步执行：回调里不能再 `publish` 同一部署（会死锁），
    /// 也不应阻塞；需要异步处理时用 `subscribe_channel`
    pub fn subscribe<F>(&self, deployment_id: &str, observer: F) -> Subscription
    where
        F: Fn(&Deployment) + Send + Sync + 'static,
    {
        let observer_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut topics = self.inner.topics.write().unwrap_or_else(|e| e.into_inner());
            let topic = topics.entry(deployment_id.to_string()).or_default();
            topic
                .observers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((observer_id, Arc::new(observer)));
        }

        Subscription {
            hub: Arc::downgrade(&self.inner),
            deployment_id: deployment_id.to_string(),
            observer_id,
            active: AtomicBool::new(true),
        }
    }

    /// 以通道形式订阅（SSE 等异步消费者）
    ///
    /// 接收端被丢弃后发送静默失败，直到订阅句柄被释放
    pub fn subscribe_channel(&self, deployment_id: &str) -> (Subscription, mpsc::UnboundedReceiver<Deployment>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(deployment_id, move |deployment| {
            let _ = tx.send(deployment.clone());
        });
        (subscription, rx)
    }

    /// 向该部署的全部观察者投递记录
    pub fn publish(&self, deployment: &Deployment) {
        let Some(topic) = self.inner.topic(&deployment.id) else {
            return;
        };

        // 持有投递锁期间不持有观察者列表锁，观察者回调里可以安全地订阅/退订
        let _delivery = topic.delivery.lock().unwrap_or_else(|e| e.into_inner());
        topic.published.store(true, Ordering::Release);
        let observers: Vec<Observer> = topic
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            observer(deployment);
        }
    }

    /// 部署进入终态，不再有发布
    ///
    /// 没有观察者时立即回收；否则等最后一个观察者退订时回收
    pub fn finish(&self, deployment_id: &str) {
        let mut topics = self.inner.topics.write().unwrap_or_else(|e| e.into_inner());
        let reclaim = match topics.get(deployment_id) {
            Some(topic) => {
                topic.finished.store(true, Ordering::Release);
                topic.is_empty()
            }
            None => false,
        };
        if reclaim {
            topics.remove(deployment_id);
        }
    }

    /// 清理已结束且无观察者的 topic
    pub fn cleanup(&self) -> usize {
        let mut topics = self.inner.topics.write().unwrap_or_else(|e| e.into_inner());
        let before = topics.len();
        topics.retain(|_, topic| !topic.is_reclaimable());
        before - topics.len()
    }

    /// topic 数量
    pub fn topic_count(&self) -> usize {
        self.inner.topics.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 某个部署的观察者数量
    pub fn observer_count(&self, deployment_id: &str) -> usize {
        self.inner.topic(deployment_id).map_or(0, |topic| {
            topic.observers.lock().unwrap_or_else(|e| e.into_inner()).len()
        })
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// 订阅句柄
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    hub: Weak<HubInner>,
    deployment_id: String,
    observer_id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// 退订；重复调用无副作用，部署结束后调用也安全
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove_observer(&self.deployment_id, self.observer_id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("deployment_id", &self.deployment_id)
            .field("observer_id", &self.observer_id)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deploy::DeploymentStatus;
    use chrono::Utc;

    fn record(id: &str, status: DeploymentStatus) -> Deployment {
        let mut d = Deployment::new(id, "app-1", "v1", Utc::now());
        d.status = status;
        d
    }

    fn recorder() -> (Arc<Mutex<Vec<DeploymentStatus>>>, impl Fn(&Deployment) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |d: &Deployment| sink.lock().unwrap().push(d.status))
    }

    #[test]
    fn test_publish_in_order_without_replay() {
        let hub = NotificationHub::new();
        hub.publish(&record("d-1", DeploymentStatus::Pending));

        let (seen, observer) = recorder();
        let _sub = hub.subscribe("d-1", observer);

        hub.publish(&record("d-1", DeploymentStatus::Building));
        hub.publish(&record("d-1", DeploymentStatus::Deploying));
        hub.publish(&record("d-2", DeploymentStatus::Failed));
        hub.publish(&record("d-1", DeploymentStatus::Deployed));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                DeploymentStatus::Building,
                DeploymentStatus::Deploying,
                DeploymentStatus::Deployed
            ]
        );
    }

    #[test]
    fn test_double_unsubscribe_is_harmless() {
        let hub = NotificationHub::new();
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        let sub_a = hub.subscribe("d-1", first);
        let _sub_b = hub.subscribe("d-1", second);

        sub_a.unsubscribe();
        sub_a.unsubscribe();
        assert_eq!(hub.observer_count("d-1"), 1);

        hub.publish(&record("d-1", DeploymentStatus::Building));
        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(*second_seen.lock().unwrap(), vec![DeploymentStatus::Building]);
    }

    #[test]
    fn test_unsubscribe_after_finish_reclaims_topic() {
        let hub = NotificationHub::new();
        let (_, observer) = recorder();
        let sub = hub.subscribe("d-1", observer);

        hub.publish(&record("d-1", DeploymentStatus::Deployed));
        hub.finish("d-1");
        assert_eq!(hub.topic_count(), 1);

        sub.unsubscribe();
        assert_eq!(hub.topic_count(), 0);
        sub.unsubscribe();
    }

    #[test]
    fn test_finish_without_observers_reclaims_immediately() {
        let hub = NotificationHub::new();
        let sub = hub.subscribe("d-1", |_| {});
        hub.publish(&record("d-1", DeploymentStatus::Building));
        drop(sub);

        // 未结束的空 topic 保留到 finish
        assert_eq!(hub.topic_count(), 1);
        assert_eq!(hub.cleanup(), 0);

        hub.finish("d-1");
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn test_topic_without_publishes_reclaimed_on_last_unsubscribe() {
        let hub = NotificationHub::new();
        // 已结束的部署：topic 在 finish 时已回收，之后的订阅不会再有发布
        hub.finish("d-1");
        let first = hub.subscribe("d-1", |_| {});
        let second = hub.subscribe("d-1", |_| {});
        assert_eq!(hub.topic_count(), 1);

        first.unsubscribe();
        assert_eq!(hub.topic_count(), 1);
        second.unsubscribe();
        assert_eq!(hub.topic_count(), 0);
        assert_eq!(hub.cleanup(), 0);
    }

    #[test]
    fn test_observer_may_publish_other_deployment() {
        let hub = NotificationHub::new();
        let (seen, observer) = recorder();
        let _child = hub.subscribe("d-2", observer);

        let relay = hub.clone();
        let _parent = hub.subscribe("d-1", move |d: &Deployment| {
            relay.publish(&record("d-2", d.status));
        });

        hub.publish(&record("d-1", DeploymentStatus::Building));
        assert_eq!(*seen.lock().unwrap(), vec![DeploymentStatus::Building]);
    }

    #[test]
    fn test_unsubscribe_after_hub_dropped() {
        let hub = NotificationHub::new();
        let sub = hub.subscribe("d-1", |_| {});
        drop(hub);
        sub.unsubscribe();
    }

    #[test]
    fn test_observer_may_unsubscribe_during_delivery() {
        let hub = NotificationHub::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let sub = hub.subscribe("d-1", move |_| {
            if let Some(sub) = inner.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        hub.publish(&record("d-1", DeploymentStatus::Building));
        assert_eq!(hub.observer_count("d-1"), 0);
    }

    #[tokio::test]
    async fn test_channel_subscription() {
        let hub = NotificationHub::new();
        let (sub, mut rx) = hub.subscribe_channel("d-1");

        hub.publish(&record("d-1", DeploymentStatus::Building));
        hub.publish(&record("d-1", DeploymentStatus::Failed));

        assert_eq!(rx.recv().await.unwrap().status, DeploymentStatus::Building);
        assert_eq!(rx.recv().await.unwrap().status, DeploymentStatus::Failed);

        drop(sub);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_concurrent_publishers_preserve_per_observer_order() {
        let hub = NotificationHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = hub.subscribe("d-1", move |d: &Deployment| {
            sink.lock().unwrap().push(d.version.clone())
        });

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let mut d = record("d-1", DeploymentStatus::Building);
                        d.version = format!("{t}-{i}");
                        hub.publish(&d);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 200);
        // 同一发布者的消息不被重排
        for t in 0..4 {
            let prefix = format!("{t}-");
            let mine: Vec<_> = seen.iter().filter(|v| v.starts_with(&prefix)).collect();
            let expected: Vec<_> = (0..50).map(|i| format!("{t}-{i}")).collect();
            assert_eq!(mine.into_iter().cloned().collect::<Vec<_>>(), expected);
        }
    }
}
