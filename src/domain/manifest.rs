//! 工作负载与网络暴露描述
//!
//! 由清单合成器生成，不持久化

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 标签映射（保持插入顺序，便于输出稳定）
pub type Labels = IndexMap<String, String>;

/// CPU / 内存数量
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuantity {
    pub cpu: String,
    pub memory: String,
}

/// 资源请求与限制
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequirements {
    pub requests: ResourceQuantity,
    pub limits: ResourceQuantity,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            requests: ResourceQuantity {
                cpu: "100m".to_string(),
                memory: "128Mi".to_string(),
            },
            limits: ResourceQuantity {
                cpu: "500m".to_string(),
                memory: "512Mi".to_string(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub name: String,
    pub container_port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// HTTP 健康检查
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub path: String,
    /// 命名端口
    pub port: String,
    pub initial_delay_seconds: u32,
    pub period_seconds: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<ContainerPort>,
    pub env: Vec<EnvVar>,
    pub resources: ResourceRequirements,
    pub liveness_probe: Probe,
    pub readiness_probe: Probe,
}

/// 工作负载描述
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDescriptor {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    /// 选择器（labels 的子集）
    pub selector: Labels,
    pub replicas: u32,
    pub containers: Vec<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

impl WorkloadDescriptor {
    /// 主容器
    pub fn primary_container(&self) -> Option<&ContainerSpec> {
        self.containers.first()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    /// 指向容器的命名端口
    pub target_port: String,
}

/// 网络暴露描述
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NetworkDescriptor {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub selector: Labels,
    pub ports: Vec<ServicePort>,
}

impl NetworkDescriptor {
    /// 集群内可解析地址，例如 `my-app.team-a.svc.cluster.local:80`
    pub fn address(&self, cluster_domain: &str) -> String {
        let port = self.ports.first().map_or(80, |p| p.port);
        format!("{}.{}.{}:{}", self.name, self.namespace, cluster_domain, port)
    }
}
