//! 运行时状态模块
//!
//! 应用状态、部署记录存储、项目目录与通知中心

pub mod app_state;
pub mod catalog;
pub mod deployment_store;
pub mod notification_hub;

pub use app_state::AppState;
pub use catalog::{CatalogSeed, CatalogStore, MemoryCatalog};
pub use deployment_store::{DeploymentStore, MemoryDeploymentStore};
pub use notification_hub::{NotificationHub, Subscription};
