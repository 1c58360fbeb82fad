//! 统一错误处理
//!
//! - `StoreError` / `CollaboratorError` / `DeployError`：库内部错误
//! - `ApiError`：实现 `IntoResponse`，替代重复的 `(StatusCode, Json<ErrorResponse>)` 模式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::domain::deploy::RecordViolation;
use crate::infra::command::CommandError;

/// 记录存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record '{0}' not found")]
    NotFound(String),

    #[error("record '{0}' already exists")]
    Duplicate(String),

    #[error("record '{id}' rejected update: {violation}")]
    Violation {
        id: String,
        #[source]
        violation: RecordViolation,
    },

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// 外部协作者（镜像构建器、集群客户端）调用失败
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("image build failed: {0}")]
    Build(String),

    #[error("cluster operation failed: {0}")]
    Cluster(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{stage} stage exceeded its deadline of {seconds}s")]
    DeadlineExceeded { stage: &'static str, seconds: u64 },

    #[error("deployment cancelled")]
    Cancelled,
}

impl CollaboratorError {
    pub fn build(msg: impl Into<String>) -> Self {
        Self::Build(msg.into())
    }

    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }
}

/// 编排器对调用方暴露的错误
///
/// 流水线启动后的阶段错误不会通过这里返回，而是记录为 `failed` 状态
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("application '{0}' not found")]
    ApplicationNotFound(String),

    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("deployment '{0}' not found")]
    DeploymentNotFound(String),

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("application '{application_id}' already has an active deployment '{deployment_id}'")]
    AlreadyActive {
        application_id: String,
        deployment_id: String,
    },

    #[error("deployment '{0}' is not in flight")]
    NotInFlight(String),

    #[error("cannot roll back: {0}")]
    InvalidRollback(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type DeployResult<T> = Result<T, DeployError>;

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// 统一 API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 401 - 未授权（API Key 无效或缺失）
    Unauthorized,
    /// 404 - 资源未找到
    NotFound(String),
    /// 400 - 请求无效
    BadRequest(String),
    /// 409 - 冲突（如：应用已有进行中的部署）
    Conflict(String),
    /// 500 - 内部错误
    Internal(String),
    /// 503 - 服务不可用（集群或构建器调用失败）
    ServiceUnavailable(String),
}

impl ApiError {
    /// 创建未授权错误
    pub fn unauthorized() -> Self {
        Self::Unauthorized
    }

    /// 创建未找到错误
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// 创建请求无效错误
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// 创建冲突错误
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 创建服务不可用错误
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::ApplicationNotFound(id) => ApiError::not_found(format!("Application '{}'", id)),
            DeployError::ProjectNotFound(id) => ApiError::not_found(format!("Project '{}'", id)),
            DeployError::DeploymentNotFound(id) => ApiError::not_found(format!("Deployment '{}'", id)),
            DeployError::InvalidInput(_) | DeployError::InvalidRollback(_) => {
                ApiError::bad_request(err.to_string())
            }
            DeployError::AlreadyActive { .. } | DeployError::NotInFlight(_) => {
                ApiError::conflict(err.to_string())
            }
            DeployError::Collaborator(e) => ApiError::service_unavailable(e.to_string()),
            DeployError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::not_found(format!("Record '{}'", id)),
            StoreError::Duplicate(_) => ApiError::conflict(err.to_string()),
            StoreError::Violation { .. } => ApiError::conflict(err.to_string()),
            StoreError::Unavailable(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl From<CollaboratorError> for ApiError {
    fn from(err: CollaboratorError) -> Self {
        ApiError::service_unavailable(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or missing API key".to_string(),
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} not found", resource),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = ErrorResponse::new(error_type, message);
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthorized => write!(f, "Unauthorized"),
            ApiError::NotFound(r) => write!(f, "Not found: {}", r),
            ApiError::BadRequest(m) => write!(f, "Bad request: {}", m),
            ApiError::Conflict(m) => write!(f, "Conflict: {}", m),
            ApiError::Internal(m) => write!(f, "Internal error: {}", m),
            ApiError::ServiceUnavailable(m) => write!(f, "Service unavailable: {}", m),
        }
    }
}

impl std::error::Error for ApiError {}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;
