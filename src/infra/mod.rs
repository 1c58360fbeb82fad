//! 基础设施模块
//!
//! 封装外部依赖（命令执行、镜像构建、集群访问、时钟）

pub mod clock;
pub mod cluster;
pub mod command;
pub mod image_builder;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster::{ClusterClient, KubectlClient, PodStatus, SimulatedCluster};
pub use command::CommandRunner;
pub use image_builder::{BuildRequest, DockerImageBuilder, ImageBuilder, SimulatedImageBuilder};
