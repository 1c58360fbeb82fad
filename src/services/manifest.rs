//! Manifest synthesis
//!
//! Maps an application, its project and a pushed image onto the workload and
//! network-exposure descriptors. Pure: no I/O, same input gives the same output.

use crate::config::EnvConfig;
use crate::domain::application::{Application, BuildConfig, Project};
use crate::domain::manifest::{
    ContainerPort, ContainerSpec, EnvVar, Labels, NetworkDescriptor, Probe, ResourceRequirements,
    ServicePort, WorkloadDescriptor,
};

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

/// Named container port; the network descriptor targets this name, never a number.
pub const HTTP_PORT_NAME: &str = "http";
/// Port exposed by the network descriptor.
pub const SERVICE_PORT: u16 = 80;

const LIVENESS_PATH: &str = "/health";
const LIVENESS_INITIAL_DELAY: u32 = 30;
const LIVENESS_PERIOD: u32 = 10;
const READINESS_PATH: &str = "/ready";
const READINESS_INITIAL_DELAY: u32 = 5;
const READINESS_PERIOD: u32 = 5;

/// Resource name used when a display name sanitizes to nothing.
const FALLBACK_NAME: &str = "app";

/// Static inputs of the synthesizer.
#[derive(Clone, Debug)]
pub struct ManifestConfig {
    /// Value of the `managed-by` label.
    pub managed_by: String,
    pub resources: ResourceRequirements,
    pub image_pull_secret: Option<String>,
    pub replicas: u32,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            managed_by: "xuanwu-factory".to_string(),
            resources: ResourceRequirements::default(),
            image_pull_secret: Some("registry-secret".to_string()),
            replicas: 1,
        }
    }
}

impl ManifestConfig {
    pub fn from_env_config(config: &EnvConfig) -> Self {
        Self {
            managed_by: config.managed_by.clone(),
            resources: config.resources.clone(),
            image_pull_secret: config.image_pull_secret.clone(),
            replicas: 1,
        }
    }
}

/// Canonical resource name: lowercase, every char outside `[a-z0-9-]` becomes `-`.
///
/// Idempotent, and the result always matches `[a-z0-9-]+`.
pub fn sanitize_name(raw: &str) -> String {
    let name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if name.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        name
    }
}

#[derive(Clone, Debug, Default)]
pub struct ManifestSynthesizer {
    config: ManifestConfig,
}

impl ManifestSynthesizer {
    pub fn new(config: ManifestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ManifestConfig {
        &self.config
    }

    /// Labels shared by both descriptors so they can be correlated.
    pub fn labels(&self, application: &Application, project: &Project) -> Labels {
        let mut labels = Labels::new();
        labels.insert(LABEL_NAME.to_string(), sanitize_name(&application.name));
        labels.insert(LABEL_INSTANCE.to_string(), application.id.clone());
        labels.insert(LABEL_MANAGED_BY.to_string(), self.config.managed_by.clone());
        labels.insert(LABEL_PART_OF.to_string(), project.name.clone());
        labels
    }

    fn selector(labels: &Labels) -> Labels {
        labels
            .iter()
            .filter(|(k, _)| k.as_str() == LABEL_NAME || k.as_str() == LABEL_INSTANCE)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn synthesize(
        &self,
        application: &Application,
        project: &Project,
        image_ref: &str,
        build_config: Option<&BuildConfig>,
    ) -> (WorkloadDescriptor, NetworkDescriptor) {
        let name = sanitize_name(&application.name);
        let labels = self.labels(application, project);
        let selector = Self::selector(&labels);

        let empty = BuildConfig::new();
        let build_config = build_config.unwrap_or(&empty);

        let env = build_config
            .env_entries()
            .map(|(name, value)| EnvVar {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect();

        let container = ContainerSpec {
            name: name.clone(),
            image: image_ref.to_string(),
            ports: vec![ContainerPort {
                name: HTTP_PORT_NAME.to_string(),
                container_port: build_config.port(),
            }],
            env,
            resources: self.config.resources.clone(),
            liveness_probe: Probe {
                path: LIVENESS_PATH.to_string(),
                port: HTTP_PORT_NAME.to_string(),
                initial_delay_seconds: LIVENESS_INITIAL_DELAY,
                period_seconds: LIVENESS_PERIOD,
            },
            readiness_probe: Probe {
                path: READINESS_PATH.to_string(),
                port: HTTP_PORT_NAME.to_string(),
                initial_delay_seconds: READINESS_INITIAL_DELAY,
                period_seconds: READINESS_PERIOD,
            },
        };

        let workload = WorkloadDescriptor {
            kind: "Workload".to_string(),
            name: name.clone(),
            namespace: project.namespace.clone(),
            labels: labels.clone(),
            selector: selector.clone(),
            replicas: self.config.replicas,
            containers: vec![container],
            image_pull_secrets: self.config.image_pull_secret.iter().cloned().collect(),
        };

        let network = NetworkDescriptor {
            name,
            namespace: project.namespace.clone(),
            labels,
            selector,
            ports: vec![ServicePort {
                name: HTTP_PORT_NAME.to_string(),
                port: SERVICE_PORT,
                target_port: HTTP_PORT_NAME.to_string(),
            }],
        };

        (workload, network)
    }
}
