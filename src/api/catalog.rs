//! 项目与应用 API
//!
//! 包含 /projects/*, /applications/*, /applications/:id/manifests 端点

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::application::{Application, BuildConfig, BuildType, Project};
use crate::domain::manifest::{NetworkDescriptor, WorkloadDescriptor};
use crate::error::{ApiError, ApiResult};
use crate::infra::cluster::to_kubernetes_manifests;
use crate::middleware::RequireApiKey;
use crate::services::manifest::sanitize_name;
use crate::state::{AppState, CatalogStore};

/// 创建项目请求
#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    /// 默认由名称生成
    pub namespace: Option<String>,
    pub description: Option<String>,
}

/// 创建应用请求
#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    pub project_id: String,
    pub name: String,
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub build_type: BuildType,
    pub dockerfile_path: Option<String>,
    pub build_config: Option<BuildConfig>,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ApplicationQuery {
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestQuery {
    /// 预览用的版本，默认 `latest`
    pub version: Option<String>,
}

/// 清单预览响应
#[derive(Debug, Serialize)]
pub struct ManifestPreviewResponse {
    pub image: String,
    pub workload: WorkloadDescriptor,
    pub network: NetworkDescriptor,
    /// 集群客户端实际下发的 Kubernetes 对象
    pub kubernetes: serde_json::Value,
}

/// 创建项目与应用路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/:id", get(get_project))
        .route("/applications", get(list_applications).post(create_application))
        .route("/applications/:id", get(get_application))
        .route("/applications/:id/manifests", get(preview_manifests))
}

fn require_non_empty(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// POST /projects
/// 需要 API Key
async fn create_project(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    require_non_empty("name", &request.name)?;

    let namespace = match request.namespace {
        Some(ns) if !ns.trim().is_empty() => sanitize_name(ns.trim()),
        _ => sanitize_name(&request.name),
    };
    let mut project = Project::new(request.name.trim(), namespace);
    project.description = request.description;

    let project = state.catalog.create_project(project).await?;
    tracing::info!(project_id = %project.id, namespace = %project.namespace, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /projects
async fn list_projects(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.catalog.list_projects().await?))
}

/// GET /projects/:id
async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    state
        .catalog
        .get_project(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Project '{}'", id)))
}

/// POST /applications
/// 需要 API Key
async fn create_application(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateApplicationRequest>,
) -> ApiResult<impl IntoResponse> {
    require_non_empty("name", &request.name)?;
    require_non_empty("repository", &request.repository)?;
    require_non_empty("branch", &request.branch)?;

    if state.catalog.get_project(&request.project_id).await?.is_none() {
        return Err(ApiError::not_found(format!("Project '{}'", request.project_id)));
    }

    let mut application = Application::new(
        request.project_id,
        request.name.trim(),
        request.repository.trim(),
        request.branch.trim(),
        request.build_type,
    );
    application.dockerfile_path = request.dockerfile_path;
    application.build_config = request.build_config;

    let application = state.catalog.create_application(application).await?;
    tracing::info!(
        application_id = %application.id,
        name = %application.name,
        build_type = %application.build_type,
        "Application created"
    );
    Ok((StatusCode::CREATED, Json(application)))
}

/// GET /applications?project_id=
async fn list_applications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ApplicationQuery>,
) -> ApiResult<Json<Vec<Application>>> {
    Ok(Json(
        state.catalog.list_applications(query.project_id.as_deref()).await?,
    ))
}

/// GET /applications/:id
async fn get_application(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Application>> {
    state
        .catalog
        .get_application(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Application '{}'", id)))
}

/// 预览清单
///
/// GET /applications/:id/manifests?version=
async fn preview_manifests(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ManifestQuery>,
) -> ApiResult<Json<ManifestPreviewResponse>> {
    let application = state
        .catalog
        .get_application(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Application '{}'", id)))?;

    let version = query.version.unwrap_or_else(|| "latest".to_string());
    let image = state
        .config
        .registry
        .image_ref(&sanitize_name(&application.name), &version);
    let (workload, network) = state.orchestrator.preview_manifests(&id, &image).await?;

    Ok(Json(ManifestPreviewResponse {
        kubernetes: to_kubernetes_manifests(&workload, &network),
        image,
        workload,
        network,
    }))
}
