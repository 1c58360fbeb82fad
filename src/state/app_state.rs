//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 全局 shutdown token，用于优雅关闭所有后台任务
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN
        .get_or_init(CancellationToken::new)
        .clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

use crate::config::env::{ClusterMode, EnvConfig};
use crate::error::StoreError;
use crate::infra::{
    ClusterClient, DockerImageBuilder, ImageBuilder, KubectlClient, SimulatedCluster, SimulatedImageBuilder,
};
use crate::services::deploy::{Orchestrator, OrchestratorConfig};
use crate::services::manifest::{ManifestConfig, ManifestSynthesizer};

use super::catalog::MemoryCatalog;
use super::deployment_store::MemoryDeploymentStore;
use super::notification_hub::NotificationHub;

/// 模拟构建耗时
const SIMULATED_BUILD_DELAY: Duration = Duration::from_secs(3);
/// 模拟下发耗时
const SIMULATED_APPLY_DELAY: Duration = Duration::from_secs(2);

/// 应用状态
pub struct AppState {
    // ========== 核心配置 ==========
    /// API 密钥（用于验证写操作）
    pub api_key: String,
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 存储 ==========
    /// 项目与应用目录
    pub catalog: Arc<MemoryCatalog>,
    /// 部署记录
    pub deployments: Arc<MemoryDeploymentStore>,
    /// 部署状态通知中心
    pub hub: NotificationHub,

    // ========== 编排 ==========
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// 按配置装配协作者
    pub fn new(config: EnvConfig) -> Self {
        tracing::info!(
            api_key_len = config.api_key.len(),
            port = config.port,
            cluster_mode = ?config.cluster_mode,
            registry = %config.registry.host,
            single_active = config.single_active_deployment,
            "Loaded configuration"
        );

        let (builder, cluster): (Arc<dyn ImageBuilder>, Arc<dyn ClusterClient>) = match config.cluster_mode {
            ClusterMode::Kubectl => (
                Arc::new(
                    DockerImageBuilder::new(config.registry.clone(), config.build_work_dir.clone())
                        .with_commands(config.git_path.clone(), config.docker_path.clone()),
                ),
                Arc::new(KubectlClient::new(config.kubectl_path.clone())),
            ),
            ClusterMode::Simulated => (
                Arc::new(SimulatedImageBuilder::new(config.registry.clone(), SIMULATED_BUILD_DELAY)),
                Arc::new(SimulatedCluster::new(SIMULATED_APPLY_DELAY)),
            ),
        };

        Self::with_collaborators(config, builder, cluster)
    }

    /// 使用指定的镜像构建器与集群客户端
    pub fn with_collaborators(
        config: EnvConfig,
        builder: Arc<dyn ImageBuilder>,
        cluster: Arc<dyn ClusterClient>,
    ) -> Self {
        let catalog = Arc::new(MemoryCatalog::new());
        let deployments = Arc::new(MemoryDeploymentStore::new());
        let hub = NotificationHub::new();

        let orchestrator = Arc::new(
            Orchestrator::new(catalog.clone(), deployments.clone(), hub.clone(), builder, cluster)
                .with_synthesizer(ManifestSynthesizer::new(ManifestConfig::from_env_config(&config)))
                .with_config(OrchestratorConfig::from_env_config(&config)),
        );

        Self {
            api_key: config.api_key.clone(),
            started_at: Utc::now(),
            catalog,
            deployments,
            hub,
            orchestrator,
            config,
        }
    }

    /// 加载种子目录（如果配置了）
    pub async fn load_catalog(&self) -> Result<(), StoreError> {
        match &self.config.catalog_file {
            Some(path) => self.catalog.load_file(path).await,
            None => Ok(()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(EnvConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CatalogStore;

    #[tokio::test]
    async fn test_default_state_is_simulated() {
        let state = AppState::default();
        assert_eq!(state.config.cluster_mode, ClusterMode::Simulated);
        assert_eq!(state.orchestrator.running_count().await, 0);
        assert!(state.catalog.list_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_catalog_without_file_is_noop() {
        let state = AppState::default();
        state.load_catalog().await.unwrap();
    }
}
