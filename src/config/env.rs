//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::domain::manifest::{ResourceQuantity, ResourceRequirements};

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// API 密钥
    pub api_key: String,
    /// 服务监听端口
    pub port: u16,
    /// 镜像仓库
    pub registry: RegistryConfig,
    /// 默认资源请求/限制
    pub resources: ResourceRequirements,
    /// 工作负载引用的镜像拉取密钥
    pub image_pull_secret: Option<String>,
    /// managed-by 标签值
    pub managed_by: String,
    /// 服务地址后缀
    pub cluster_domain: String,
    /// 各阶段超时
    pub stage_timeouts: StageTimeouts,
    /// 等待 Pod 运行的轮询间隔
    pub pod_poll_interval: Duration,
    /// 每个应用同时只允许一个未结束的部署
    pub single_active_deployment: bool,
    /// 协作者模式
    pub cluster_mode: ClusterMode,
    pub kubectl_path: String,
    pub docker_path: String,
    pub git_path: String,
    /// 构建检出目录
    pub build_work_dir: PathBuf,
    /// 项目/应用种子文件
    pub catalog_file: Option<PathBuf>,
}

/// 镜像仓库配置
#[derive(Clone, Debug, PartialEq)]
pub struct RegistryConfig {
    pub host: String,
    pub namespace: String,
}

impl RegistryConfig {
    /// `<host>/<namespace>/<name>:<version>`
    pub fn image_ref(&self, application_name: &str, version: &str) -> String {
        format!("{}/{}/{}:{}", self.host, self.namespace, application_name, version)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "registry.example.com".to_string(),
            namespace: "xuanwu".to_string(),
        }
    }
}

/// 阶段超时（`None` 表示不限）
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageTimeouts {
    pub build: Option<Duration>,
    pub deploy: Option<Duration>,
    pub verify: Option<Duration>,
}

/// 镜像构建器与集群客户端的实现选择
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterMode {
    /// 调用本机 git/docker/kubectl
    Kubectl,
    /// 内存模拟，不产生外部副作用
    Simulated,
}

impl ClusterMode {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "kubectl" | "kubernetes" | "k8s" => ClusterMode::Kubectl,
            _ => ClusterMode::Simulated,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            api_key: "change-me-in-production".to_string(),
            port: 9880,
            registry: RegistryConfig::default(),
            resources: ResourceRequirements::default(),
            image_pull_secret: Some("registry-secret".to_string()),
            managed_by: "xuanwu-factory".to_string(),
            cluster_domain: "svc.cluster.local".to_string(),
            stage_timeouts: StageTimeouts {
                build: Some(Duration::from_secs(constants::BUILD_TIMEOUT_SECS)),
                deploy: Some(Duration::from_secs(constants::DEPLOY_TIMEOUT_SECS)),
                verify: Some(Duration::from_secs(constants::VERIFY_TIMEOUT_SECS)),
            },
            pod_poll_interval: Duration::from_millis(constants::POD_POLL_INTERVAL_MS),
            single_active_deployment: false,
            cluster_mode: ClusterMode::Simulated,
            kubectl_path: "kubectl".to_string(),
            docker_path: "docker".to_string(),
            git_path: "git".to_string(),
            build_work_dir: env::temp_dir(),
            catalog_file: None,
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // API Key - 支持旧名称兼容
        let api_key = load_with_fallback("DEPLOYER_API_KEY", "API_KEY").unwrap_or(defaults.api_key);
        if env::var("API_KEY").is_ok() && env::var("DEPLOYER_API_KEY").is_err() {
            warn!("Deprecated environment variable API_KEY detected. Please use DEPLOYER_API_KEY");
        }

        let registry = RegistryConfig {
            host: env::var("REGISTRY_URL").unwrap_or(defaults.registry.host),
            namespace: env::var("REGISTRY_NAMESPACE").unwrap_or(defaults.registry.namespace),
        };

        let resources = ResourceRequirements {
            requests: ResourceQuantity {
                cpu: env::var("K8S_CPU_REQUEST").unwrap_or(defaults.resources.requests.cpu),
                memory: env::var("K8S_MEMORY_REQUEST").unwrap_or(defaults.resources.requests.memory),
            },
            limits: ResourceQuantity {
                cpu: env::var("K8S_CPU_LIMIT").unwrap_or(defaults.resources.limits.cpu),
                memory: env::var("K8S_MEMORY_LIMIT").unwrap_or(defaults.resources.limits.memory),
            },
        };

        let image_pull_secret = match env::var("IMAGE_PULL_SECRET") {
            Ok(v) if v.is_empty() => None,
            Ok(v) => Some(v),
            Err(_) => defaults.image_pull_secret,
        };

        let stage_timeouts = StageTimeouts {
            build: timeout_from_env("BUILD_TIMEOUT_SECS", defaults.stage_timeouts.build),
            deploy: timeout_from_env("DEPLOY_TIMEOUT_SECS", defaults.stage_timeouts.deploy),
            verify: timeout_from_env("VERIFY_TIMEOUT_SECS", defaults.stage_timeouts.verify),
        };

        Self {
            api_key,
            port: parse_env("PORT").unwrap_or(defaults.port),
            registry,
            resources,
            image_pull_secret,
            managed_by: env::var("MANAGED_BY").unwrap_or(defaults.managed_by),
            cluster_domain: env::var("CLUSTER_DOMAIN").unwrap_or(defaults.cluster_domain),
            stage_timeouts,
            pod_poll_interval: parse_env("POD_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.pod_poll_interval),
            single_active_deployment: env_flag("SINGLE_ACTIVE_DEPLOYMENT")
                .unwrap_or(defaults.single_active_deployment),
            cluster_mode: env::var("CLUSTER_MODE")
                .map(|v| ClusterMode::from_str(&v))
                .unwrap_or(defaults.cluster_mode),
            kubectl_path: env::var("KUBECTL_PATH").unwrap_or(defaults.kubectl_path),
            docker_path: env::var("DOCKER_PATH").unwrap_or(defaults.docker_path),
            git_path: env::var("GIT_PATH").unwrap_or(defaults.git_path),
            build_work_dir: env::var("BUILD_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.build_work_dir),
            catalog_file: env::var("CATALOG_FILE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// 秒数为 0 表示不限时
fn timeout_from_env(key: &str, default: Option<Duration>) -> Option<Duration> {
    match parse_env::<u64>(key) {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => default,
    }
}

/// 常量
pub mod constants {
    /// 构建阶段超时（秒）
    pub const BUILD_TIMEOUT_SECS: u64 = 1800; // 30 分钟

    /// 部署阶段超时（秒）
    pub const DEPLOY_TIMEOUT_SECS: u64 = 300;

    /// 验证阶段超时（秒）
    pub const VERIFY_TIMEOUT_SECS: u64 = 300;

    /// Pod 轮询间隔（毫秒）
    pub const POD_POLL_INTERVAL_MS: u64 = 2000;

    /// 通知中心清理间隔（秒）
    pub const HUB_CLEANUP_INTERVAL_SECS: u64 = 60;

    /// SSE 心跳间隔（秒）
    pub const SSE_KEEPALIVE_SECS: u64 = 15;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
