//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod application;
pub mod deploy;
pub mod manifest;

// Re-exports for convenience
pub use application::{Application, BuildConfig, BuildType, Project};
pub use deploy::{Deployment, DeploymentStatus, DeploymentUpdate, LogLevel, LogLine, RecordViolation};
pub use manifest::{NetworkDescriptor, ResourceRequirements, WorkloadDescriptor};
