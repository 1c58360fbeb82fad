//! Xuanwu Deployer - 应用部署编排引擎
//!
//! 从源码仓库构建镜像、生成工作负载/网络清单、下发到集群，并向订阅者推送每个阶段的状态

pub mod error;
pub mod middleware;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod api;
pub mod services;

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::config::env::constants::{HUB_CLEANUP_INTERVAL_SECS, VERSION};
use crate::config::EnvConfig;
use crate::state::app_state::{get_shutdown_token, trigger_shutdown};
use crate::state::AppState;

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// 覆盖监听端口
    pub port_override: Option<u16>,
}

/// 初始化日志
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("xuanwu_deployer=info,tower_http=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// 启动服务直到收到 Ctrl-C
pub async fn init_and_run_with_config(runtime: RuntimeConfig) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }
    let port = config.port;

    tracing::info!(version = VERSION, "Xuanwu deployer starting");

    let state = Arc::new(AppState::new(config));
    state.load_catalog().await?;

    spawn_hub_cleanup(state.clone());

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Xuanwu deployer stopped");
    Ok(())
}

/// 定期回收已结束部署的通知 topic
fn spawn_hub_cleanup(state: Arc<AppState>) {
    let shutdown = get_shutdown_token();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HUB_CLEANUP_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let removed = state.hub.cleanup();
                    if removed > 0 {
                        tracing::debug!(removed, "Reclaimed notification topics");
                    }
                }
            }
        }
    });
}

async fn shutdown_signal() {
    let shutdown = get_shutdown_token();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            trigger_shutdown();
        }
        _ = shutdown.cancelled() => {}
    }
}
