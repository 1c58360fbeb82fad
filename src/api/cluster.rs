//! 工作负载运维 API
//!
//! 包含 /applications/:id/pods, /applications/:id/scale, /applications/:id/workload 端点

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::infra::PodStatus;
use crate::middleware::RequireApiKey;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub replicas: u32,
}

#[derive(Debug, Serialize)]
pub struct PodListResponse {
    pub pods: Vec<PodStatus>,
    pub running: usize,
}

#[derive(Debug, Serialize)]
pub struct PodLogsResponse {
    pub pod: String,
    pub logs: String,
}

/// 创建工作负载运维路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/applications/:id/pods", get(list_pods))
        .route("/applications/:id/pods/:pod/logs", get(pod_logs))
        .route("/applications/:id/scale", post(scale))
        .route("/applications/:id/workload", delete(delete_workload))
}

/// GET /applications/:id/pods
async fn list_pods(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PodListResponse>> {
    let pods = state.orchestrator.pods(&id).await?;
    let running = pods.iter().filter(|p| p.is_running()).count();
    Ok(Json(PodListResponse { pods, running }))
}

/// GET /applications/:id/pods/:pod/logs
async fn pod_logs(
    State(state): State<Arc<AppState>>,
    Path((id, pod)): Path<(String, String)>,
) -> ApiResult<Json<PodLogsResponse>> {
    let logs = state.orchestrator.pod_logs(&id, &pod).await?;
    Ok(Json(PodLogsResponse { pod, logs }))
}

/// POST /applications/:id/scale
/// 需要 API Key
async fn scale(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ScaleRequest>,
) -> ApiResult<impl IntoResponse> {
    state.orchestrator.scale(&id, request.replicas).await?;
    Ok(Json(serde_json::json!({
        "application_id": id,
        "replicas": request.replicas,
    })))
}

/// DELETE /applications/:id/workload
/// 需要 API Key
async fn delete_workload(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.orchestrator.delete_workload(&id).await?;
    Ok(Json(serde_json::json!({
        "application_id": id,
        "deleted": true,
    })))
}
