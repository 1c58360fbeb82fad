//! 部署上下文
//!
//! 一次部署运行的工作副本：累积日志、持久化、发布通知

use std::sync::Arc;

use crate::domain::deploy::{Deployment, DeploymentStatus, DeploymentUpdate, LogLine};
use crate::error::StoreError;
use crate::infra::Clock;
use crate::state::{DeploymentStore, NotificationHub};

/// 部署执行上下文
///
/// 日志只在本地追加，`persist` 时整段写入存储；写入成功后才发布
pub struct DeployContext {
    store: Arc<dyn DeploymentStore>,
    hub: NotificationHub,
    clock: Arc<dyn Clock>,
    /// 最近一次持久化的记录
    deployment: Deployment,
    build_logs: Option<String>,
    deploy_logs: Option<String>,
}

impl DeployContext {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        hub: NotificationHub,
        clock: Arc<dyn Clock>,
        deployment: Deployment,
    ) -> Self {
        Self {
            build_logs: deployment.build_logs.clone(),
            deploy_logs: deployment.deploy_logs.clone(),
            store,
            hub,
            clock,
            deployment,
        }
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment.id
    }

    /// 追加构建日志
    pub fn log_build(&mut self, content: impl Into<String>) {
        let line = LogLine::info(self.clock.now(), content);
        push_line(&mut self.build_logs, &line);
    }

    /// 追加部署日志
    pub fn log_deploy(&mut self, content: impl Into<String>) {
        let line = LogLine::info(self.clock.now(), content);
        push_line(&mut self.deploy_logs, &line);
    }

    /// 追加错误日志（写入部署日志）
    pub fn log_error(&mut self, content: impl Into<String>) {
        let line = LogLine::error(self.clock.now(), content);
        push_line(&mut self.deploy_logs, &line);
    }

    /// 持久化当前状态与日志，然后发布
    ///
    /// 终态自动写入完成时间
    pub async fn persist(
        &mut self,
        status: DeploymentStatus,
        image_url: Option<String>,
    ) -> Result<&Deployment, StoreError> {
        let update = DeploymentUpdate {
            status: Some(status),
            build_logs: self.build_logs.clone(),
            deploy_logs: self.deploy_logs.clone(),
            image_url,
            completed_at: status.is_terminal().then(|| self.clock.now()),
        };

        self.deployment = self.store.update(&self.deployment.id, update).await?;
        self.hub.publish(&self.deployment);
        Ok(&self.deployment)
    }

    /// 记录失败：一行错误日志 + `failed` + 完成时间
    pub async fn fail(&mut self, message: impl Into<String>) -> Result<&Deployment, StoreError> {
        self.log_error(message);
        self.persist(DeploymentStatus::Failed, None).await
    }
}

fn push_line(buffer: &mut Option<String>, line: &LogLine) {
    let text = buffer.get_or_insert_with(String::new);
    text.push_str(&line.to_string());
    text.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::ManualClock;
    use crate::state::MemoryDeploymentStore;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    async fn context() -> (DeployContext, Arc<MemoryDeploymentStore>, NotificationHub) {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let store = Arc::new(MemoryDeploymentStore::new());
        let hub = NotificationHub::new();
        let deployment = store
            .create(Deployment::new("d-1", "app-1", "v1", start))
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::with_step(start, chrono::Duration::seconds(1)));
        let ctx = DeployContext::new(store.clone(), hub.clone(), clock, deployment);
        (ctx, store, hub)
    }

    #[tokio::test]
    async fn test_persist_writes_then_publishes() {
        let (mut ctx, store, hub) = context().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = hub.subscribe("d-1", move |d: &Deployment| sink.lock().unwrap().push(d.clone()));

        ctx.log_build("Starting build");
        ctx.persist(DeploymentStatus::Building, None).await.unwrap();

        let stored = store.get("d-1").await.unwrap().unwrap();
        assert_eq!(stored.build_logs.as_deref(), Some("[2023-11-14T22:13:20Z] [INFO] Starting build\n"));
        assert_eq!(*seen.lock().unwrap(), vec![stored]);
    }

    #[tokio::test]
    async fn test_fail_sets_completion_and_error_line() {
        let (mut ctx, _store, _hub) = context().await;
        ctx.log_build("Starting build");
        ctx.persist(DeploymentStatus::Building, None).await.unwrap();

        let failed = ctx.fail("build stage failed: boom").await.unwrap();
        assert_eq!(failed.status, DeploymentStatus::Failed);
        assert!(failed.completed_at.is_some());
        let deploy_logs = failed.deploy_logs.as_deref().unwrap();
        assert_eq!(deploy_logs.lines().count(), 1);
        assert!(deploy_logs.contains("[ERROR] build stage failed: boom"));
    }
}
