//! HTTP 端到端测试：内存存储 + 模拟构建器/集群

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use xuanwu_deployer::api;
use xuanwu_deployer::config::EnvConfig;
use xuanwu_deployer::infra::{SimulatedCluster, SimulatedImageBuilder};
use xuanwu_deployer::state::AppState;

const API_KEY: &str = "test-key";

fn app() -> Router {
    let mut config = EnvConfig::default();
    config.api_key = API_KEY.to_string();
    let builder = Arc::new(SimulatedImageBuilder::new(config.registry.clone(), Duration::from_millis(20)));
    let cluster = Arc::new(SimulatedCluster::new(Duration::from_millis(20)));
    api::router(Arc::new(AppState::with_collaborators(config, builder, cluster)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>, authed: bool) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if authed {
        request = request.header("x-api-key", API_KEY);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// 创建项目和应用，返回应用 ID
async fn seed(app: &Router) -> String {
    let (status, project) = send(
        app,
        "POST",
        "/projects",
        Some(json!({"name": "Online Shop"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(project["namespace"], "online-shop");

    let (status, application) = send(
        app,
        "POST",
        "/applications",
        Some(json!({
            "project_id": project["id"],
            "name": "Cart API",
            "repository": "https://git.example.com/shop/cart.git",
            "build_type": "nodejs",
            "build_config": {"PORT": "3000", "NODE_ENV": "production"}
        })),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(application["branch"], "main");
    application["id"].as_str().unwrap().to_string()
}

async fn wait_for_terminal(app: &Router, deployment_id: &str) -> Value {
    for _ in 0..200 {
        let (status, deployment) = send(app, "GET", &format!("/deployments/{}", deployment_id), None, false).await;
        assert_eq!(status, StatusCode::OK);
        if ["deployed", "failed", "rolled_back"].contains(&deployment["status"].as_str().unwrap()) {
            return deployment;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deployment {} did not finish", deployment_id);
}

/// 等待后台运行全部退出
async fn wait_for_idle(app: &Router) {
    for _ in 0..200 {
        let (_, health) = send(app, "GET", "/health", None, false).await;
        if health["active_deployments"] == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deployments still running");
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cluster_mode"], "simulated");
}

#[tokio::test]
async fn mutating_routes_require_api_key() {
    let app = app();
    let (status, body) = send(&app, "POST", "/projects", Some(json!({"name": "x"})), false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(
        &app,
        "POST",
        "/applications/any/deployments",
        Some(json!({"version": "1"})),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deployment_runs_to_deployed() {
    let app = app();
    let application_id = seed(&app).await;

    let (status, started) = send(
        &app,
        "POST",
        &format!("/applications/{}/deployments", application_id),
        Some(json!({"version": "1.0.0"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["status"], "pending");
    assert!(started["completed_at"].is_null());
    let deployment_id = started["id"].as_str().unwrap().to_string();
    assert_eq!(started["stream_url"], format!("/deployments/{}/stream", deployment_id));

    let finished = wait_for_terminal(&app, &deployment_id).await;
    assert_eq!(finished["status"], "deployed");
    assert_eq!(finished["image_url"], "registry.example.com/xuanwu/cart-api:1.0.0");
    assert!(!finished["completed_at"].is_null());
    assert!(finished["deploy_logs"]
        .as_str()
        .unwrap()
        .contains("cart-api.online-shop.svc.cluster.local:80"));

    let (status, list) = send(
        &app,
        "GET",
        &format!("/applications/{}/deployments", application_id),
        None,
        false,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);

    let (status, pods) = send(&app, "GET", &format!("/applications/{}/pods", application_id), None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pods["running"], 1);
}

#[tokio::test]
async fn stream_of_finished_deployment_completes() {
    let app = app();
    let application_id = seed(&app).await;
    let (_, started) = send(
        &app,
        "POST",
        &format!("/applications/{}/deployments", application_id),
        Some(json!({"version": "2.0.0"})),
        true,
    )
    .await;
    let deployment_id = started["id"].as_str().unwrap().to_string();
    wait_for_terminal(&app, &deployment_id).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/deployments/{}/stream", deployment_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: deployment"));
    assert!(text.contains("event: complete"));
    assert!(text.contains("\"status\":\"deployed\""));
}

#[tokio::test]
async fn unknown_resources_return_404() {
    let app = app();
    let (status, _) = send(&app, "GET", "/deployments/missing", None, false).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/deployments/missing/stream", None, false).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        "POST",
        "/applications/missing/deployments",
        Some(json!({"version": "1"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn manifest_preview_uses_named_port() {
    let app = app();
    let application_id = seed(&app).await;

    let (status, preview) = send(
        &app,
        "GET",
        &format!("/applications/{}/manifests?version=9.9.9", application_id),
        None,
        false,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["image"], "registry.example.com/xuanwu/cart-api:9.9.9");

    let container = &preview["workload"]["containers"][0];
    assert_eq!(container["ports"][0]["containerPort"], 3000);
    assert_eq!(container["env"], json!([{"name": "NODE_ENV", "value": "production"}]));
    assert_eq!(preview["network"]["ports"][0]["port"], 80);
    assert_eq!(preview["network"]["ports"][0]["targetPort"], "http");
}

#[tokio::test]
async fn rollback_and_cancel_validation() {
    let app = app();
    let application_id = seed(&app).await;

    let mut ids = Vec::new();
    for version in ["1.0.0", "1.1.0"] {
        let (_, started) = send(
            &app,
            "POST",
            &format!("/applications/{}/deployments", application_id),
            Some(json!({"version": version})),
            true,
        )
        .await;
        let id = started["id"].as_str().unwrap().to_string();
        wait_for_terminal(&app, &id).await;
        ids.push(id);
    }

    // 已结束的部署不能取消
    wait_for_idle(&app).await;
    let (status, _) = send(&app, "POST", &format!("/deployments/{}/cancel", ids[1]), None, true).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // 只有线上的部署可以回滚
    let (status, _) = send(&app, "POST", &format!("/deployments/{}/rollback", ids[0]), None, true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, rolled_back) = send(&app, "POST", &format!("/deployments/{}/rollback", ids[1]), None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rolled_back["status"], "rolled_back");
    assert!(rolled_back["deploy_logs"].as_str().unwrap().contains("Rolled back to 1.0.0"));
}
