//! 手动回滚
//!
//! 将应用当前线上的 `deployed` 部署标记为 `rolled_back`，并把同一应用上一次成功部署的镜像重新下发。
//! 回滚期间持有运行表的读锁，新部署要等回滚结束才能启动

use tracing::info;

use super::{with_deadline, Orchestrator, Stage};
use crate::domain::deploy::{Deployment, DeploymentStatus, DeploymentUpdate, LogLine};
use crate::error::{DeployError, DeployResult};

impl Orchestrator {
    /// 回滚部署
    ///
    /// 只能回滚应用最新的 `deployed` 部署，应用没有运行中的部署，且必须存在更早的成功部署作为目标
    pub async fn rollback_deployment(&self, deployment_id: &str) -> DeployResult<Deployment> {
        let current = self.get_deployment(deployment_id).await?;
        if current.status != DeploymentStatus::Deployed {
            return Err(DeployError::InvalidRollback(format!(
                "deployment '{}' is {}, only deployed deployments can be rolled back",
                deployment_id, current.status
            )));
        }

        let (application, project) = self.resolve(&current.application_id).await?;

        let running = self.running.read().await;
        if let Some((active_id, _)) = running.iter().find(|(_, r)| r.application_id == application.id) {
            return Err(DeployError::AlreadyActive {
                application_id: application.id.clone(),
                deployment_id: active_id.clone(),
            });
        }

        let history = self.store.list_by_application(&application.id).await?;
        if let Some(live) = history.iter().find(|d| d.status == DeploymentStatus::Deployed) {
            if live.id != current.id {
                return Err(DeployError::InvalidRollback(format!(
                    "deployment '{}' is not live, '{}' was deployed after it",
                    current.id, live.id
                )));
            }
        }

        let target = history
            .into_iter()
            .find(|d| {
                d.id != current.id
                    && d.status == DeploymentStatus::Deployed
                    && d.started_at < current.started_at
            })
            .ok_or_else(|| {
                DeployError::InvalidRollback(format!(
                    "no earlier successful deployment of application '{}'",
                    application.id
                ))
            })?;
        let image = target.image_url.clone().ok_or_else(|| {
            DeployError::InvalidRollback(format!("deployment '{}' has no image", target.id))
        })?;

        let (workload, network) =
            self.synthesizer
                .synthesize(&application, &project, &image, application.build_config.as_ref());
        with_deadline(
            Stage::Deploy,
            self.config.timeouts.deploy,
            self.cluster.apply(&workload, &network),
        )
        .await?;

        let line = LogLine::info(
            self.clock.now(),
            format!("Rolled back to {} ({}) by re-applying {}", target.version, target.id, image),
        );
        let mut deploy_logs = current.deploy_logs.clone().unwrap_or_default();
        deploy_logs.push_str(&line.to_string());
        deploy_logs.push('\n');

        let rolled_back = self
            .store
            .update(
                &current.id,
                DeploymentUpdate {
                    status: Some(DeploymentStatus::RolledBack),
                    deploy_logs: Some(deploy_logs),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            deployment_id = %rolled_back.id,
            restored_deployment = %target.id,
            image = %image,
            "Deployment rolled back"
        );
        drop(running);
        self.hub.publish(&rolled_back);
        self.hub.finish(&rolled_back.id);

        Ok(rolled_back)
    }
}

#[cfg(test)]
mod tests {
    use crate::state::deployment_store::DeploymentStore;
    use super::super::tests::{fixture_with, registry, run_to_end, wait_until_idle, FailingBuilder};
    use super::super::OrchestratorConfig;
    use super::*;
    use crate::infra::{SimulatedCluster, SimulatedImageBuilder};
    use crate::services::manifest::sanitize_name;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_rollback_reapplies_previous_image() {
        let cluster = Arc::new(SimulatedCluster::default());
        let fx = fixture_with(
            Arc::new(SimulatedImageBuilder::new(registry(), Duration::from_secs(1))),
            cluster.clone(),
            OrchestratorConfig::default(),
        )
        .await;

        let first = run_to_end(&fx, "1.0.0").await.pop().unwrap();
        let second = run_to_end(&fx, "1.1.0").await.pop().unwrap();
        wait_until_idle(&fx.orchestrator).await;

        let name = sanitize_name(&fx.application.name);
        assert_eq!(cluster.image_of(&fx.project.namespace, &name), second.image_url);

        let rolled_back = fx.orchestrator.rollback_deployment(&second.id).await.unwrap();
        assert_eq!(rolled_back.status, DeploymentStatus::RolledBack);
        assert_eq!(rolled_back.completed_at, second.completed_at);
        assert_eq!(rolled_back.image_url, second.image_url);
        assert!(rolled_back
            .deploy_logs
            .as_deref()
            .unwrap()
            .starts_with(second.deploy_logs.as_deref().unwrap()));
        assert_eq!(cluster.image_of(&fx.project.namespace, &name), first.image_url);

        // 已回滚的部署不能再次回滚
        let err = fx.orchestrator.rollback_deployment(&second.id).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidRollback(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_requires_earlier_success() {
        let fx = fixture_with(
            Arc::new(SimulatedImageBuilder::new(registry(), Duration::ZERO)),
            Arc::new(SimulatedCluster::default()),
            OrchestratorConfig::default(),
        )
        .await;

        let only = run_to_end(&fx, "1.0.0").await.pop().unwrap();
        let err = fx.orchestrator.rollback_deployment(&only.id).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidRollback(msg) if msg.contains("no earlier")));

        let err = fx.orchestrator.rollback_deployment("missing").await.unwrap_err();
        assert!(matches!(err, DeployError::DeploymentNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_live_deployment_can_roll_back() {
        let cluster = Arc::new(SimulatedCluster::default());
        let fx = fixture_with(
            Arc::new(SimulatedImageBuilder::new(registry(), Duration::from_secs(1))),
            cluster.clone(),
            OrchestratorConfig::default(),
        )
        .await;

        let _v1 = run_to_end(&fx, "v1").await.pop().unwrap();
        let v2 = run_to_end(&fx, "v2").await.pop().unwrap();
        let v3 = run_to_end(&fx, "v3").await.pop().unwrap();
        wait_until_idle(&fx.orchestrator).await;

        let err = fx.orchestrator.rollback_deployment(&v2.id).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidRollback(msg) if msg.contains("not live")));

        // 集群与记录保持一致
        let name = sanitize_name(&fx.application.name);
        assert_eq!(cluster.image_of(&fx.project.namespace, &name), v3.image_url);
        assert_eq!(fx.store.get(&v2.id).await.unwrap().unwrap().status, DeploymentStatus::Deployed);

        // 回滚 v3 之后 v2 成为线上版本，可以继续回滚
        fx.orchestrator.rollback_deployment(&v3.id).await.unwrap();
        assert_eq!(cluster.image_of(&fx.project.namespace, &name), v2.image_url);
        let rolled_back = fx.orchestrator.rollback_deployment(&v2.id).await.unwrap();
        assert_eq!(rolled_back.status, DeploymentStatus::RolledBack);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_rejected_while_deployment_in_flight() {
        let cluster = Arc::new(SimulatedCluster::default());
        let fx = fixture_with(
            Arc::new(SimulatedImageBuilder::new(registry(), Duration::from_secs(1))),
            cluster.clone(),
            OrchestratorConfig::default(),
        )
        .await;

        run_to_end(&fx, "v1").await;
        let v2 = run_to_end(&fx, "v2").await.pop().unwrap();
        wait_until_idle(&fx.orchestrator).await;

        let v3 = fx.orchestrator.start_deployment(&fx.application.id, "v3").await.unwrap();
        let err = fx.orchestrator.rollback_deployment(&v2.id).await.unwrap_err();
        match err {
            DeployError::AlreadyActive { deployment_id, .. } => assert_eq!(deployment_id, v3.id),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fx.store.get(&v2.id).await.unwrap().unwrap().status, DeploymentStatus::Deployed);

        // v3 结束后 v3 成为线上版本
        while !fx.store.get(&v3.id).await.unwrap().unwrap().status.is_terminal() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let name = sanitize_name(&fx.application.name);
        assert_eq!(
            cluster.image_of(&fx.project.namespace, &name).as_deref(),
            Some("registry.example.com/xuanwu/cart-api:v3")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_deployment_cannot_roll_back() {
        let fx = fixture_with(
            Arc::new(FailingBuilder),
            Arc::new(SimulatedCluster::default()),
            OrchestratorConfig::default(),
        )
        .await;

        let failed = run_to_end(&fx, "1.0.0").await.pop().unwrap();
        let err = fx.orchestrator.rollback_deployment(&failed.id).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidRollback(msg) if msg.contains("is failed")));
    }
}
