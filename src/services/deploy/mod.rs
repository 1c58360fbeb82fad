//! 部署编排
//!
//! 每次部署在独立的 tokio 任务中按阶段顺序执行：
//!
//! 1. build：记录意图 -> `building` -> 调用镜像构建器 -> 记录结果 + 镜像地址 -> `deploying`
//! 2. deploy：记录意图 -> 生成清单并下发到集群 -> 记录结果
//! 3. verify：记录意图 -> 轮询直到至少一个 Pod 运行 -> `deployed`
//!
//! 协作者错误（含超时、取消）转换为 `failed` 终态，不重试；记录存储错误直接中止运行

pub mod context;
pub mod rollback;
pub mod workload;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::env::{EnvConfig, StageTimeouts};
use crate::domain::application::{Application, Project};
use crate::domain::deploy::{Deployment, DeploymentStatus};
use crate::error::{CollaboratorError, DeployError, DeployResult, StoreError};
use crate::infra::{BuildRequest, Clock, ClusterClient, ImageBuilder, PodStatus, SystemClock};
use crate::services::manifest::{sanitize_name, ManifestSynthesizer};
use crate::state::{CatalogStore, DeploymentStore, NotificationHub, Subscription};

pub use context::DeployContext;

/// 编排器配置
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub timeouts: StageTimeouts,
    pub pod_poll_interval: Duration,
    /// 同一应用存在未结束部署时拒绝新部署
    pub single_active_per_application: bool,
    /// 网络地址后缀，用于成功日志
    pub cluster_domain: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_env_config(&EnvConfig::default())
    }
}

impl OrchestratorConfig {
    pub fn from_env_config(config: &EnvConfig) -> Self {
        Self {
            timeouts: config.stage_timeouts,
            pod_poll_interval: config.pod_poll_interval,
            single_active_per_application: config.single_active_deployment,
            cluster_domain: config.cluster_domain.clone(),
        }
    }
}

/// 流水线阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Build,
    Deploy,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Deploy => "deploy",
            Stage::Verify => "verify",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 运行中的部署
struct RunningDeploy {
    application_id: String,
    cancel_token: CancellationToken,
}

/// 运行中止原因
enum RunError {
    /// 协作者失败，记录为 `failed`
    Stage { stage: Stage, source: CollaboratorError },
    /// 无法持久化，运行直接中止
    Store(StoreError),
}

impl From<StoreError> for RunError {
    fn from(err: StoreError) -> Self {
        RunError::Store(err)
    }
}

/// 部署编排器
pub struct Orchestrator {
    catalog: Arc<dyn CatalogStore>,
    store: Arc<dyn DeploymentStore>,
    hub: NotificationHub,
    builder: Arc<dyn ImageBuilder>,
    cluster: Arc<dyn ClusterClient>,
    synthesizer: ManifestSynthesizer,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    /// deployment_id -> RunningDeploy
    running: RwLock<HashMap<String, RunningDeploy>>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        store: Arc<dyn DeploymentStore>,
        hub: NotificationHub,
        builder: Arc<dyn ImageBuilder>,
        cluster: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            catalog,
            store,
            hub,
            builder,
            cluster,
            synthesizer: ManifestSynthesizer::default(),
            clock: Arc::new(SystemClock),
            config: OrchestratorConfig::default(),
            running: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: ManifestSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn synthesizer(&self) -> &ManifestSynthesizer {
        &self.synthesizer
    }

    /// 启动部署
    ///
    /// 立即返回 `pending` 记录，流水线在后台继续
    pub async fn start_deployment(self: &Arc<Self>, application_id: &str, version: &str) -> DeployResult<Deployment> {
        let deployment_id = uuid::Uuid::new_v4().to_string();
        self.launch(deployment_id, application_id, version).await
    }

    /// 启动部署，并在 `pending` 发布之前注册观察者
    ///
    /// 观察者能看到完整的状态序列
    pub async fn start_deployment_observed<F>(
        self: &Arc<Self>,
        application_id: &str,
        version: &str,
        observer: F,
    ) -> DeployResult<(Deployment, Subscription)>
    where
        F: Fn(&Deployment) + Send + Sync + 'static,
    {
        let deployment_id = uuid::Uuid::new_v4().to_string();
        let subscription = self.hub.subscribe(&deployment_id, observer);

        match self.launch(deployment_id.clone(), application_id, version).await {
            Ok(deployment) => Ok((deployment, subscription)),
            Err(e) => {
                subscription.unsubscribe();
                self.hub.finish(&deployment_id);
                Err(e)
            }
        }
    }

    /// 订阅部署状态
    pub fn subscribe_to_deployment<F>(&self, deployment_id: &str, observer: F) -> Subscription
    where
        F: Fn(&Deployment) + Send + Sync + 'static,
    {
        self.hub.subscribe(deployment_id, observer)
    }

    async fn launch(
        self: &Arc<Self>,
        deployment_id: String,
        application_id: &str,
        version: &str,
    ) -> DeployResult<Deployment> {
        let version = version.trim();
        if version.is_empty() {
            return Err(DeployError::InvalidInput("version must not be empty".to_string()));
        }

        let (application, project) = self.resolve(application_id).await?;
        let deployment = Deployment::new(deployment_id, &application.id, version, self.clock.now());
        let cancel_token = CancellationToken::new();

        {
            let mut running = self.running.write().await;
            if let Some((active_id, _)) = running.iter().find(|(_, r)| r.application_id == application.id) {
                if self.config.single_active_per_application {
                    return Err(DeployError::AlreadyActive {
                        application_id: application.id.clone(),
                        deployment_id: active_id.clone(),
                    });
                }
                warn!(
                    application_id = %application.id,
                    active_deployment = %active_id,
                    "Starting concurrent deployment; both runs write the same workload"
                );
            }

            self.store.create(deployment.clone()).await?;
            running.insert(
                deployment.id.clone(),
                RunningDeploy {
                    application_id: application.id.clone(),
                    cancel_token: cancel_token.clone(),
                },
            );
        }

        info!(
            deployment_id = %deployment.id,
            application = %application.name,
            version = %deployment.version,
            "Deployment created"
        );
        self.hub.publish(&deployment);

        let this = Arc::clone(self);
        let pending = deployment.clone();
        tokio::spawn(async move {
            this.run(application, project, pending, cancel_token).await;
        });

        Ok(deployment)
    }

    /// 取消运行中的部署
    ///
    /// 只发出信号；记录随后以 `failed` 结束
    pub async fn cancel_deployment(&self, deployment_id: &str) -> DeployResult<()> {
        if let Some(running) = self.running.read().await.get(deployment_id) {
            running.cancel_token.cancel();
            info!(deployment_id, "Deployment cancellation requested");
            return Ok(());
        }

        match self.store.get(deployment_id).await? {
            Some(_) => Err(DeployError::NotInFlight(deployment_id.to_string())),
            None => Err(DeployError::DeploymentNotFound(deployment_id.to_string())),
        }
    }

    pub async fn get_deployment(&self, deployment_id: &str) -> DeployResult<Deployment> {
        self.store
            .get(deployment_id)
            .await?
            .ok_or_else(|| DeployError::DeploymentNotFound(deployment_id.to_string()))
    }

    /// 应用的部署历史（新的在前）
    pub async fn list_deployments(&self, application_id: &str) -> DeployResult<Vec<Deployment>> {
        if self.catalog.get_application(application_id).await?.is_none() {
            return Err(DeployError::ApplicationNotFound(application_id.to_string()));
        }
        Ok(self.store.list_by_application(application_id).await?)
    }

    /// 运行中的部署数量
    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// 查找应用及其项目
    async fn resolve(&self, application_id: &str) -> DeployResult<(Application, Project)> {
        let application = self
            .catalog
            .get_application(application_id)
            .await?
            .ok_or_else(|| DeployError::ApplicationNotFound(application_id.to_string()))?;
        let project = self
            .catalog
            .get_project(&application.project_id)
            .await?
            .ok_or_else(|| DeployError::ProjectNotFound(application.project_id.clone()))?;
        Ok((application, project))
    }

    async fn run(
        self: Arc<Self>,
        application: Application,
        project: Project,
        deployment: Deployment,
        cancel_token: CancellationToken,
    ) {
        let deployment_id = deployment.id.clone();
        let mut ctx = DeployContext::new(self.store.clone(), self.hub.clone(), self.clock.clone(), deployment);

        match self.execute(&mut ctx, &application, &project, &cancel_token).await {
            Ok(()) => {
                info!(deployment_id = %deployment_id, application = %application.name, "Deployment succeeded");
            }
            Err(RunError::Stage { stage, source }) => {
                warn!(deployment_id = %deployment_id, stage = %stage, error = %source, "Deployment failed");
                if let Err(e) = ctx.fail(format!("{} stage failed: {}", stage, source)).await {
                    error!(deployment_id = %deployment_id, error = %e, "Failed to record deployment failure");
                }
            }
            Err(RunError::Store(e)) => {
                error!(deployment_id = %deployment_id, error = %e, "Deployment aborted: record store write failed");
            }
        }

        self.running.write().await.remove(&deployment_id);
        self.hub.finish(&deployment_id);
    }

    async fn execute(
        &self,
        ctx: &mut DeployContext,
        application: &Application,
        project: &Project,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let timeouts = self.config.timeouts;

        // ========== build ==========
        let request = BuildRequest::for_application(application, &ctx.deployment().version);
        ctx.log_build(format!(
            "Building {} ({}) from {}@{}",
            request.application_name, request.build_type, request.repository, request.branch
        ));
        ctx.persist(DeploymentStatus::Building, None).await?;

        let image = self
            .guarded(Stage::Build, timeouts.build, cancel, self.builder.build(&request))
            .await?;

        ctx.log_build(format!("Image pushed: {}", image));
        ctx.persist(DeploymentStatus::Deploying, Some(image.clone())).await?;

        // ========== deploy ==========
        let (workload, network) =
            self.synthesizer
                .synthesize(application, project, &image, application.build_config.as_ref());

        ctx.log_deploy(format!(
            "Applying workload {} and network {} to namespace {}",
            workload.name, network.name, workload.namespace
        ));
        ctx.persist(DeploymentStatus::Deploying, None).await?;

        self.guarded(Stage::Deploy, timeouts.deploy, cancel, self.cluster.apply(&workload, &network))
            .await?;

        ctx.log_deploy(format!("Workload {} applied", workload.name));
        ctx.persist(DeploymentStatus::Deploying, None).await?;

        // ========== verify ==========
        ctx.log_deploy(format!("Waiting for a running pod of {}", workload.name));
        ctx.persist(DeploymentStatus::Deploying, None).await?;

        let pod = self
            .guarded(
                Stage::Verify,
                timeouts.verify,
                cancel,
                self.wait_for_running_pod(&workload.namespace, &workload.name),
            )
            .await?;

        ctx.log_deploy(format!("Pod {} is running", pod.name));
        ctx.log_deploy(format!(
            "Deployment succeeded, reachable at {}",
            network.address(&self.config.cluster_domain)
        ));
        ctx.persist(DeploymentStatus::Deployed, None).await?;

        Ok(())
    }

    /// 阶段调用：叠加超时与取消
    async fn guarded<T, F>(
        &self,
        stage: Stage,
        limit: Option<Duration>,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, RunError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
            result = with_deadline(stage, limit, call) => result,
        };
        result.map_err(|source| RunError::Stage { stage, source })
    }

    async fn wait_for_running_pod(&self, namespace: &str, name: &str) -> Result<PodStatus, CollaboratorError> {
        loop {
            let pods = self.cluster.pod_status(namespace, name).await?;
            if let Some(pod) = pods.into_iter().find(PodStatus::is_running) {
                return Ok(pod);
            }
            tokio::time::sleep(self.config.pod_poll_interval).await;
        }
    }

    /// 应用对应的 (namespace, workload name)
    async fn workload_target(&self, application_id: &str) -> DeployResult<(Application, Project, String)> {
        let (application, project) = self.resolve(application_id).await?;
        let name = sanitize_name(&application.name);
        Ok((application, project, name))
    }
}

/// `None` 表示不限时
async fn with_deadline<T, F>(stage: Stage, limit: Option<Duration>, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(CollaboratorError::DeadlineExceeded {
                stage: stage.as_str(),
                seconds: limit.as_secs(),
            })
        }),
        None => call.await,
    }
}
