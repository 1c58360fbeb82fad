//! 部署管理 API
//!
//! 包含 /applications/:id/deployments, /deployments/* 端点

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};

use crate::config::env::constants::SSE_KEEPALIVE_SECS;
use crate::domain::deploy::Deployment;
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 启动部署请求
#[derive(Debug, Clone, Deserialize)]
pub struct StartDeploymentRequest {
    pub version: String,
}

/// 启动部署响应
#[derive(Debug, Serialize)]
pub struct StartDeploymentResponse {
    #[serde(flatten)]
    pub deployment: Deployment,
    pub stream_url: String,
}

/// 部署列表响应
#[derive(Debug, Serialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<Deployment>,
    pub total: usize,
}

/// 创建部署管理路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/applications/:id/deployments",
            get(list_deployments).post(start_deployment),
        )
        .route("/deployments/:id", get(get_deployment))
        .route("/deployments/:id/stream", get(stream_deployment))
        .route("/deployments/:id/cancel", post(cancel_deployment))
        .route("/deployments/:id/rollback", post(rollback_deployment))
}

/// 启动部署
///
/// POST /applications/:id/deployments
/// 需要 API Key；立即返回 pending 记录，流水线在后台执行
async fn start_deployment(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
    Json(request): Json<StartDeploymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let deployment = state
        .orchestrator
        .start_deployment(&application_id, &request.version)
        .await?;

    let stream_url = format!("/deployments/{}/stream", deployment.id);
    Ok((
        StatusCode::ACCEPTED,
        Json(StartDeploymentResponse {
            deployment,
            stream_url,
        }),
    ))
}

/// GET /applications/:id/deployments
async fn list_deployments(
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
) -> ApiResult<Json<DeploymentListResponse>> {
    let deployments = state.orchestrator.list_deployments(&application_id).await?;
    let total = deployments.len();
    Ok(Json(DeploymentListResponse { deployments, total }))
}

/// GET /deployments/:id
async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Deployment>> {
    Ok(Json(state.orchestrator.get_deployment(&id).await?))
}

/// POST /deployments/:id/cancel
/// 需要 API Key
async fn cancel_deployment(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.orchestrator.cancel_deployment(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "deployment_id": id,
            "message": "Cancellation requested"
        })),
    ))
}

/// POST /deployments/:id/rollback
/// 需要 API Key
async fn rollback_deployment(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Deployment>> {
    Ok(Json(state.orchestrator.rollback_deployment(&id).await?))
}

fn deployment_event(deployment: &Deployment) -> Event {
    Event::default()
        .event("deployment")
        .data(serde_json::to_string(deployment).unwrap_or_default())
}

/// 流式部署状态
///
/// GET /deployments/:id/stream
/// 无需认证。先发送当前记录，然后发送每次更新，终态后发送 `complete` 事件并关闭
async fn stream_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // 先订阅再读取快照，避免漏掉两者之间的发布
    let (subscription, mut rx) = state.hub.subscribe_channel(&id);
    let current = match state.orchestrator.get_deployment(&id).await {
        Ok(deployment) => deployment,
        Err(e) => {
            drop(subscription);
            state.hub.finish(&id);
            return Err(ApiError::from(e));
        }
    };

    let hub = state.hub.clone();
    let stream = async_stream::stream! {
        let subscription = subscription;
        let mut last = current;
        yield Ok(deployment_event(&last));

        while !last.status.is_terminal() {
            match rx.recv().await {
                Some(deployment) => {
                    if deployment == last {
                        continue;
                    }
                    yield Ok(deployment_event(&deployment));
                    last = deployment;
                }
                None => break,
            }
        }

        yield Ok(Event::default().event("complete").data(
            serde_json::json!({
                "status": last.status,
                "image_url": last.image_url,
                "completed_at": last.completed_at,
            })
            .to_string(),
        ));

        subscription.unsubscribe();
        hub.finish(&last.id);
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keepalive"),
    ))
}
