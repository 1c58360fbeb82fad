//! 项目与应用目录
//!
//! 编排器只读取；写入来自 API 或启动时的种子文件

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::application::{Application, Project};
use crate::error::StoreError;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_project(&self, project: Project) -> Result<Project, StoreError>;
    async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError>;
    async fn list_projects(&self) -> Result<Vec<Project>, StoreError>;

    /// 所属项目必须已存在
    async fn create_application(&self, application: Application) -> Result<Application, StoreError>;
    async fn get_application(&self, id: &str) -> Result<Option<Application>, StoreError>;
    /// `project_id` 为 `None` 时返回全部
    async fn list_applications(&self, project_id: Option<&str>) -> Result<Vec<Application>, StoreError>;
}

/// 种子文件格式
#[derive(Debug, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub applications: Vec<Application>,
}

/// 内存目录
pub struct MemoryCatalog {
    projects: RwLock<HashMap<String, Project>>,
    applications: RwLock<HashMap<String, Application>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            applications: RwLock::new(HashMap::new()),
        }
    }

    /// 导入种子数据（先项目后应用）
    pub async fn seed(&self, seed: CatalogSeed) -> Result<(), StoreError> {
        for project in seed.projects {
            self.create_project(project).await?;
        }
        for application in seed.applications {
            self.create_application(application).await?;
        }
        Ok(())
    }

    /// 从 JSON 文件加载
    pub async fn load_file(&self, path: &Path) -> Result<(), StoreError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("cannot read {}: {}", path.display(), e)))?;
        let seed: CatalogSeed = serde_json::from_str(&content)
            .map_err(|e| StoreError::Unavailable(format!("invalid catalog {}: {}", path.display(), e)))?;

        let (projects, applications) = (seed.projects.len(), seed.applications.len());
        self.seed(seed).await?;
        info!(path = %path.display(), projects, applications, "Catalog loaded");
        Ok(())
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn create_project(&self, project: Project) -> Result<Project, StoreError> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.id) {
            return Err(StoreError::Duplicate(project.id));
        }
        projects.insert(project.id.clone(), project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        let mut list: Vec<_> = self.projects.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(list)
    }

    async fn create_application(&self, application: Application) -> Result<Application, StoreError> {
        if !self.projects.read().await.contains_key(&application.project_id) {
            return Err(StoreError::NotFound(application.project_id));
        }
        let mut applications = self.applications.write().await;
        if applications.contains_key(&application.id) {
            return Err(StoreError::Duplicate(application.id));
        }
        applications.insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn get_application(&self, id: &str) -> Result<Option<Application>, StoreError> {
        Ok(self.applications.read().await.get(id).cloned())
    }

    async fn list_applications(&self, project_id: Option<&str>) -> Result<Vec<Application>, StoreError> {
        let mut list: Vec<_> = self
            .applications
            .read()
            .await
            .values()
            .filter(|a| project_id.map_or(true, |p| a.project_id == p))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(list)
    }
}
