//! Cluster Client
//!
//! Applies and queries workload / network descriptors against a cluster.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::manifest::{NetworkDescriptor, WorkloadDescriptor};
use crate::error::CollaboratorError;
use crate::infra::command::CommandRunner;
use crate::services::manifest::LABEL_NAME;

/// 单个 Pod 的状态
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PodStatus {
    pub name: String,
    /// Pending / Running / Succeeded / Failed / Unknown
    pub phase: String,
    pub ready: bool,
    pub restarts: u32,
}

impl PodStatus {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// 创建或更新工作负载与网络暴露
    async fn apply(
        &self,
        workload: &WorkloadDescriptor,
        network: &NetworkDescriptor,
    ) -> Result<(), CollaboratorError>;

    /// 按资源名查询 Pod
    async fn pod_status(&self, namespace: &str, name: &str) -> Result<Vec<PodStatus>, CollaboratorError>;

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, CollaboratorError>;

    async fn scale(&self, namespace: &str, name: &str, replicas: u32) -> Result<(), CollaboratorError>;

    /// 删除工作负载与网络暴露（不存在时视为成功）
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), CollaboratorError>;
}

/// 描述转换为 Kubernetes Deployment + Service 清单（`kind: List`）
pub fn to_kubernetes_manifests(workload: &WorkloadDescriptor, network: &NetworkDescriptor) -> Value {
    let containers: Vec<Value> = workload
        .containers
        .iter()
        .map(|c| {
            let probe = |p: &crate::domain::manifest::Probe| {
                json!({
                    "httpGet": { "path": p.path, "port": p.port },
                    "initialDelaySeconds": p.initial_delay_seconds,
                    "periodSeconds": p.period_seconds,
                })
            };
            json!({
                "name": c.name,
                "image": c.image,
                "ports": c.ports.iter().map(|p| json!({
                    "name": p.name,
                    "containerPort": p.container_port,
                    "protocol": "TCP",
                })).collect::<Vec<_>>(),
                "env": c.env,
                "resources": c.resources,
                "livenessProbe": probe(&c.liveness_probe),
                "readinessProbe": probe(&c.readiness_probe),
            })
        })
        .collect();

    let pull_secrets: Vec<Value> = workload
        .image_pull_secrets
        .iter()
        .map(|name| json!({ "name": name }))
        .collect();

    let deployment = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": workload.name,
            "namespace": workload.namespace,
            "labels": workload.labels,
        },
        "spec": {
            "replicas": workload.replicas,
            "selector": { "matchLabels": workload.selector },
            "template": {
                "metadata": { "labels": workload.labels },
                "spec": {
                    "containers": containers,
                    "imagePullSecrets": pull_secrets,
                },
            },
        },
    });

    let service = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": network.name,
            "namespace": network.namespace,
            "labels": network.labels,
        },
        "spec": {
            "type": "ClusterIP",
            "selector": network.selector,
            "ports": network.ports.iter().map(|p| json!({
                "name": p.name,
                "port": p.port,
                "targetPort": p.target_port,
                "protocol": "TCP",
            })).collect::<Vec<_>>(),
        },
    });

    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [deployment, service],
    })
}

/// 解析 `kubectl get pods -o json` 输出
pub fn parse_pod_list(raw: &str) -> Result<Vec<PodStatus>, CollaboratorError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| CollaboratorError::cluster(format!("invalid pod list: {}", e)))?;

    let items = value["items"].as_array().cloned().unwrap_or_default();
    Ok(items
        .iter()
        .map(|item| {
            let statuses = item["status"]["containerStatuses"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            PodStatus {
                name: item["metadata"]["name"].as_str().unwrap_or_default().to_string(),
                phase: item["status"]["phase"].as_str().unwrap_or("Unknown").to_string(),
                ready: !statuses.is_empty()
                    && statuses.iter().all(|s| s["ready"].as_bool().unwrap_or(false)),
                restarts: statuses
                    .iter()
                    .map(|s| s["restartCount"].as_u64().unwrap_or(0) as u32)
                    .sum(),
            }
        })
        .collect())
}

/// 通过 kubectl 访问集群
pub struct KubectlClient {
    kubectl: String,
    timeout: Option<Duration>,
}

impl KubectlClient {
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
            timeout: Some(Duration::from_secs(60)),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn kubectl(&self, args: &[&str]) -> Result<String, CollaboratorError> {
        Ok(CommandRunner::run_checked(&self.kubectl, args, None, self.timeout).await?)
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn apply(
        &self,
        workload: &WorkloadDescriptor,
        network: &NetworkDescriptor,
    ) -> Result<(), CollaboratorError> {
        let manifests = to_kubernetes_manifests(workload, network);
        let body = serde_json::to_vec(&manifests)
            .map_err(|e| CollaboratorError::cluster(format!("failed to encode manifests: {}", e)))?;

        let output = CommandRunner::run_with_stdin(&self.kubectl, &["apply", "-f", "-"], &body, self.timeout).await?;
        let stdout = CommandRunner::ensure_success(&self.kubectl, output)?;
        info!(
            namespace = %workload.namespace,
            name = %workload.name,
            "kubectl apply: {}",
            stdout.trim()
        );
        Ok(())
    }

    async fn pod_status(&self, namespace: &str, name: &str) -> Result<Vec<PodStatus>, CollaboratorError> {
        let selector = format!("{}={}", LABEL_NAME, name);
        let raw = self
            .kubectl(&["get", "pods", "-n", namespace, "-l", &selector, "-o", "json"])
            .await?;
        parse_pod_list(&raw)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, CollaboratorError> {
        self.kubectl(&["logs", "-n", namespace, pod, "--tail=500"]).await
    }

    async fn scale(&self, namespace: &str, name: &str, replicas: u32) -> Result<(), CollaboratorError> {
        let target = format!("deployment/{}", name);
        let replicas = format!("--replicas={}", replicas);
        self.kubectl(&["scale", &target, &replicas, "-n", namespace]).await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), CollaboratorError> {
        for kind in ["deployment", "service"] {
            self.kubectl(&["delete", kind, name, "-n", namespace, "--ignore-not-found"])
                .await?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct SimulatedWorkload {
    image: String,
    replicas: u32,
}

/// 内存中的模拟集群
///
/// 应用后立即报告 `replicas` 个 Running Pod，名称为 `<name>-<index>`
#[derive(Default)]
pub struct SimulatedCluster {
    workloads: Mutex<HashMap<(String, String), SimulatedWorkload>>,
    apply_delay: Duration,
}

impl SimulatedCluster {
    pub fn new(apply_delay: Duration) -> Self {
        Self {
            workloads: Mutex::new(HashMap::new()),
            apply_delay,
        }
    }

    /// 当前镜像
    pub fn image_of(&self, namespace: &str, name: &str) -> Option<String> {
        let workloads = self.workloads.lock().unwrap_or_else(|e| e.into_inner());
        workloads
            .get(&(namespace.to_string(), name.to_string()))
            .map(|w| w.image.clone())
    }
}

#[async_trait]
impl ClusterClient for SimulatedCluster {
    async fn apply(
        &self,
        workload: &WorkloadDescriptor,
        _network: &NetworkDescriptor,
    ) -> Result<(), CollaboratorError> {
        tokio::time::sleep(self.apply_delay).await;
        let image = workload
            .primary_container()
            .map(|c| c.image.clone())
            .ok_or_else(|| CollaboratorError::cluster("workload has no containers"))?;

        debug!(namespace = %workload.namespace, name = %workload.name, image = %image, "Simulated apply");
        let mut workloads = self.workloads.lock().unwrap_or_else(|e| e.into_inner());
        workloads.insert(
            (workload.namespace.clone(), workload.name.clone()),
            SimulatedWorkload {
                image,
                replicas: workload.replicas,
            },
        );
        Ok(())
    }

    async fn pod_status(&self, namespace: &str, name: &str) -> Result<Vec<PodStatus>, CollaboratorError> {
        let workloads = self.workloads.lock().unwrap_or_else(|e| e.into_inner());
        let replicas = workloads
            .get(&(namespace.to_string(), name.to_string()))
            .map_or(0, |w| w.replicas);
        Ok((0..replicas)
            .map(|i| PodStatus {
                name: format!("{}-{}", name, i),
                phase: "Running".to_string(),
                ready: true,
                restarts: 0,
            })
            .collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, CollaboratorError> {
        let workloads = self.workloads.lock().unwrap_or_else(|e| e.into_inner());
        let known = workloads
            .keys()
            .any(|(ns, name)| ns == namespace && pod.starts_with(name.as_str()));
        if !known {
            return Err(CollaboratorError::cluster(format!("pod '{}' not found in '{}'", pod, namespace)));
        }
        Ok("[INFO] Starting application...\n[INFO] Server started\n[INFO] Application is ready to serve requests\n".to_string())
    }

    async fn scale(&self, namespace: &str, name: &str, replicas: u32) -> Result<(), CollaboratorError> {
        let mut workloads = self.workloads.lock().unwrap_or_else(|e| e.into_inner());
        let workload = workloads
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| CollaboratorError::cluster(format!("workload '{}' not found in '{}'", name, namespace)))?;
        workload.replicas = replicas;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), CollaboratorError> {
        let mut workloads = self.workloads.lock().unwrap_or_else(|e| e.into_inner());
        workloads.remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}
