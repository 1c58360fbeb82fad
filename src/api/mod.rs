//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod catalog;
pub mod cluster;
pub mod deploy;
pub mod health;

use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .merge(health::router())
        // Projects & applications
        .merge(catalog::router())
        // Deployments
        .merge(deploy::router())
        // Workload operations
        .merge(cluster::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
