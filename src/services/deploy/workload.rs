//! 已部署工作负载的运维操作与清单预览

use tracing::info;

use super::Orchestrator;
use crate::domain::manifest::{NetworkDescriptor, WorkloadDescriptor};
use crate::error::{DeployError, DeployResult};
use crate::infra::PodStatus;

/// 手动扩缩容上限
pub const MAX_REPLICAS: u32 = 20;

impl Orchestrator {
    /// 生成清单但不下发
    pub async fn preview_manifests(
        &self,
        application_id: &str,
        image_ref: &str,
    ) -> DeployResult<(WorkloadDescriptor, NetworkDescriptor)> {
        let (application, project) = self.resolve(application_id).await?;
        Ok(self
            .synthesizer
            .synthesize(&application, &project, image_ref, application.build_config.as_ref()))
    }

    pub async fn pods(&self, application_id: &str) -> DeployResult<Vec<PodStatus>> {
        let (_, project, name) = self.workload_target(application_id).await?;
        Ok(self.cluster.pod_status(&project.namespace, &name).await?)
    }

    pub async fn pod_logs(&self, application_id: &str, pod: &str) -> DeployResult<String> {
        let (_, project, name) = self.workload_target(application_id).await?;
        if !pod.starts_with(&name) {
            return Err(DeployError::InvalidInput(format!(
                "pod '{}' does not belong to workload '{}'",
                pod, name
            )));
        }
        Ok(self.cluster.pod_logs(&project.namespace, pod).await?)
    }

    pub async fn scale(&self, application_id: &str, replicas: u32) -> DeployResult<()> {
        if replicas > MAX_REPLICAS {
            return Err(DeployError::InvalidInput(format!(
                "replicas must be between 0 and {}",
                MAX_REPLICAS
            )));
        }
        let (_, project, name) = self.workload_target(application_id).await?;
        self.cluster.scale(&project.namespace, &name, replicas).await?;
        info!(application_id, workload = %name, replicas, "Workload scaled");
        Ok(())
    }

    pub async fn delete_workload(&self, application_id: &str) -> DeployResult<()> {
        let (_, project, name) = self.workload_target(application_id).await?;
        self.cluster.delete(&project.namespace, &name).await?;
        info!(application_id, workload = %name, "Workload deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fixture, run_to_end};
    use super::*;
    use crate::services::manifest::HTTP_PORT_NAME;

    #[tokio::test(start_paused = true)]
    async fn test_preview_matches_application() {
        let fx = fixture().await;
        let (workload, network) = fx
            .orchestrator
            .preview_manifests(&fx.application.id, "registry.example.com/xuanwu/cart-api:9")
            .await
            .unwrap();

        assert_eq!(workload.name, "cart-api");
        assert_eq!(workload.namespace, "shop");
        let container = workload.primary_container().unwrap();
        assert_eq!(container.ports[0].container_port, 9090);
        assert_eq!(container.env.len(), 1);
        assert_eq!(network.ports[0].target_port, HTTP_PORT_NAME);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_and_delete_deployed_workload() {
        let fx = fixture().await;
        run_to_end(&fx, "1.0.0").await;

        assert_eq!(fx.orchestrator.pods(&fx.application.id).await.unwrap().len(), 1);

        fx.orchestrator.scale(&fx.application.id, 3).await.unwrap();
        let pods = fx.orchestrator.pods(&fx.application.id).await.unwrap();
        assert_eq!(pods.len(), 3);

        let logs = fx.orchestrator.pod_logs(&fx.application.id, &pods[0].name).await.unwrap();
        assert!(!logs.is_empty());
        let err = fx.orchestrator.pod_logs(&fx.application.id, "other-0").await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidInput(_)));

        let err = fx.orchestrator.scale(&fx.application.id, MAX_REPLICAS + 1).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidInput(_)));

        fx.orchestrator.delete_workload(&fx.application.id).await.unwrap();
        assert!(fx.orchestrator.pods(&fx.application.id).await.unwrap().is_empty());
    }
}
