//! Image Builder
//!
//! Turns repository + branch + build type into a pushed image reference.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::env::RegistryConfig;
use crate::domain::application::{Application, BuildConfig, BuildType};
use crate::error::CollaboratorError;
use crate::infra::command::CommandRunner;
use crate::services::build_template;
use crate::services::manifest::sanitize_name;

/// Container file written into the checkout for runtime build types.
const GENERATED_DOCKERFILE: &str = "Dockerfile.xuanwu";

/// Everything a builder needs to produce one image.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildRequest {
    /// Sanitized application name, used as the image repository name.
    pub application_name: String,
    pub repository: String,
    pub branch: String,
    pub build_type: BuildType,
    pub dockerfile_path: Option<String>,
    pub build_config: Option<BuildConfig>,
    pub version: String,
}

impl BuildRequest {
    pub fn for_application(application: &Application, version: &str) -> Self {
        Self {
            application_name: sanitize_name(&application.name),
            repository: application.repository.clone(),
            branch: application.branch.clone(),
            build_type: application.build_type,
            dockerfile_path: application.dockerfile_path.clone(),
            build_config: application.build_config.clone(),
            version: version.to_string(),
        }
    }
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build and push; returns `<registryHost>/<registryNamespace>/<applicationName>:<version>`.
    async fn build(&self, request: &BuildRequest) -> Result<String, CollaboratorError>;
}

/// Builds with git + docker on the local host.
pub struct DockerImageBuilder {
    registry: RegistryConfig,
    git: String,
    docker: String,
    work_root: PathBuf,
    /// Per-command limit; the orchestrator's stage deadline applies on top.
    command_timeout: Option<Duration>,
}

impl DockerImageBuilder {
    pub fn new(registry: RegistryConfig, work_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            git: "git".to_string(),
            docker: "docker".to_string(),
            work_root: work_root.into(),
            command_timeout: None,
        }
    }

    pub fn with_commands(mut self, git: impl Into<String>, docker: impl Into<String>) -> Self {
        self.git = git.into();
        self.docker = docker.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// 每次构建独立的临时目录，drop 时删除
    async fn work_dir(&self, request: &BuildRequest) -> Result<tempfile::TempDir, CollaboratorError> {
        tokio::fs::create_dir_all(&self.work_root)
            .await
            .map_err(|e| CollaboratorError::build(format!("failed to create work dir: {}", e)))?;
        tempfile::Builder::new()
            .prefix(&format!("{}-", request.application_name))
            .tempdir_in(&self.work_root)
            .map_err(|e| CollaboratorError::build(format!("failed to create build checkout: {}", e)))
    }

    async fn build_in(&self, checkout: &Path, request: &BuildRequest) -> Result<String, CollaboratorError> {
        let checkout_str = checkout.to_string_lossy().into_owned();

        CommandRunner::run_checked(
            &self.git,
            &[
                "clone",
                "--depth",
                "1",
                "--branch",
                &request.branch,
                "--",
                &request.repository,
                &checkout_str,
            ],
            None,
            self.command_timeout,
        )
        .await?;

        let dockerfile = match build_template::template_for(request.build_type) {
            Some(template) => {
                let rendered = template.render(request.build_config.as_ref());
                tokio::fs::write(checkout.join(GENERATED_DOCKERFILE), rendered)
                    .await
                    .map_err(|e| CollaboratorError::build(format!("failed to write container file: {}", e)))?;
                GENERATED_DOCKERFILE.to_string()
            }
            None => request
                .dockerfile_path
                .clone()
                .unwrap_or_else(|| "Dockerfile".to_string()),
        };

        let image = self.registry.image_ref(&request.application_name, &request.version);
        info!(image = %image, dockerfile = %dockerfile, "Building image");

        CommandRunner::run_checked(
            &self.docker,
            &["build", "-t", &image, "-f", &dockerfile, "."],
            Some(checkout),
            self.command_timeout,
        )
        .await?;

        CommandRunner::run_checked(&self.docker, &["push", &image], None, self.command_timeout).await?;

        Ok(image)
    }
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<String, CollaboratorError> {
        let work_dir = self.work_dir(request).await?;
        // git 需要一个不存在的目标目录
        let checkout = work_dir.path().join("src");
        debug!(path = %checkout.display(), "Build checkout");

        let result = self.build_in(&checkout, request).await;

        // 超时或取消时 future 被丢弃，TempDir 的 Drop 同样会清理
        if let Err(e) = work_dir.close() {
            warn!(error = %e, "Failed to clean up build checkout");
        }
        result
    }
}

/// Builder without side effects: waits, then reports the image it would have pushed.
pub struct SimulatedImageBuilder {
    registry: RegistryConfig,
    delay: Duration,
}

impl SimulatedImageBuilder {
    pub fn new(registry: RegistryConfig, delay: Duration) -> Self {
        Self { registry, delay }
    }
}

#[async_trait]
impl ImageBuilder for SimulatedImageBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<String, CollaboratorError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.registry.image_ref(&request.application_name, &request.version))
    }
}
