//! 部署记录存储
//!
//! 按部署 ID 串行化写入：每条记录有独立的锁，不同部署之间完全并发

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::domain::deploy::{Deployment, DeploymentUpdate};
use crate::error::StoreError;

/// 部署记录存储
///
/// `update` 返回写入后的完整记录，编排器用它发布通知
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// 写入新记录
    async fn create(&self, deployment: Deployment) -> Result<Deployment, StoreError>;

    /// 部分更新，校验记录不变量
    async fn update(&self, id: &str, update: DeploymentUpdate) -> Result<Deployment, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Deployment>, StoreError>;

    /// 应用的全部部署，按开始时间倒序
    async fn list_by_application(&self, application_id: &str) -> Result<Vec<Deployment>, StoreError>;
}

/// 内存实现
pub struct MemoryDeploymentStore {
    records: RwLock<HashMap<String, Arc<Mutex<Deployment>>>>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// 记录数量
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    async fn record(&self, id: &str) -> Option<Arc<Mutex<Deployment>>> {
        self.records.read().await.get(id).cloned()
    }
}

impl Default for MemoryDeploymentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn create(&self, deployment: Deployment) -> Result<Deployment, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&deployment.id) {
            return Err(StoreError::Duplicate(deployment.id));
        }
        records.insert(deployment.id.clone(), Arc::new(Mutex::new(deployment.clone())));
        Ok(deployment)
    }

    async fn update(&self, id: &str, update: DeploymentUpdate) -> Result<Deployment, StoreError> {
        let record = self
            .record(id)
            .await
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut deployment = record.lock().await;
        deployment.apply(update).map_err(|violation| StoreError::Violation {
            id: id.to_string(),
            violation,
        })?;
        Ok(deployment.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, StoreError> {
        match self.record(id).await {
            Some(record) => Ok(Some(record.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_by_application(&self, application_id: &str) -> Result<Vec<Deployment>, StoreError> {
        let records: Vec<_> = self.records.read().await.values().cloned().collect();

        let mut result = Vec::new();
        for record in records {
            let deployment = record.lock().await;
            if deployment.application_id == application_id {
                result.push(deployment.clone());
            }
        }
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deploy::{DeploymentStatus, RecordViolation};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryDeploymentStore::new();
        store.create(Deployment::new("d-1", "app-1", "v1", at(0))).await.unwrap();

        let found = store.get("d-1").await.unwrap().unwrap();
        assert_eq!(found.status, DeploymentStatus::Pending);
        assert!(store.get("missing").await.unwrap().is_none());
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = MemoryDeploymentStore::new();
        store.create(Deployment::new("d-1", "app-1", "v1", at(0))).await.unwrap();

        let err = store.create(Deployment::new("d-1", "app-2", "v2", at(1))).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == "d-1"));
    }

    #[tokio::test]
    async fn test_update_returns_persisted_record() {
        let store = MemoryDeploymentStore::new();
        store.create(Deployment::new("d-1", "app-1", "v1", at(0))).await.unwrap();

        let updated = store
            .update(
                "d-1",
                DeploymentUpdate {
                    status: Some(DeploymentStatus::Building),
                    build_logs: Some("line\n".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, DeploymentStatus::Building);
        assert_eq!(store.get("d-1").await.unwrap().unwrap(), updated);
    }

    #[tokio::test]
    async fn test_update_violation_leaves_record_untouched() {
        let store = MemoryDeploymentStore::new();
        store.create(Deployment::new("d-1", "app-1", "v1", at(0))).await.unwrap();

        let err = store
            .update(
                "d-1",
                DeploymentUpdate {
                    status: Some(DeploymentStatus::Deployed),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        match err {
            StoreError::Violation { id, violation } => {
                assert_eq!(id, "d-1");
                assert!(matches!(violation, RecordViolation::InvalidTransition { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            store.get("d-1").await.unwrap().unwrap().status,
            DeploymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = MemoryDeploymentStore::new();
        let err = store.update("nope", DeploymentUpdate::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_by_application_newest_first() {
        let store = MemoryDeploymentStore::new();
        store.create(Deployment::new("d-1", "app-1", "v1", at(0))).await.unwrap();
        store.create(Deployment::new("d-2", "app-2", "v1", at(1))).await.unwrap();
        store.create(Deployment::new("d-3", "app-1", "v2", at(2))).await.unwrap();

        let list = store.list_by_application("app-1").await.unwrap();
        let ids: Vec<_> = list.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d-3", "d-1"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_serialized() {
        let store = Arc::new(MemoryDeploymentStore::new());
        store.create(Deployment::new("d-1", "app-1", "v1", at(0))).await.unwrap();

        // 每个任务读取当前日志后追加一行；冲突的写入会被前缀校验拒绝而不是静默覆盖
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let current = store.get("d-1").await.unwrap().unwrap();
                    let mut logs = current.build_logs.unwrap_or_default();
                    logs.push_str(&format!("line {i}\n"));
                    let update = DeploymentUpdate {
                        build_logs: Some(logs),
                        ..Default::default()
                    };
                    if store.update("d-1", update).await.is_ok() {
                        break;
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let logs = store.get("d-1").await.unwrap().unwrap().build_logs.unwrap();
        assert_eq!(logs.lines().count(), 8);
    }
}
