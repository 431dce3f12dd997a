//! 统一错误处理
//!
//! `ApiError` 实现 `IntoResponse`，领域错误在 HTTP 边界统一转换

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::domain::app::TransitionError;
use crate::services::config_gen::DeployError;
use crate::services::workflows::WorkflowError;
use crate::state::{FlightConflict, StoreError};

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// 统一 API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 404 - 资源未找到
    NotFound(String),
    /// 400 - 请求无效
    BadRequest(String),
    /// 409 - 冲突（非法状态转换、已有进行中的操作）
    Conflict(String),
    /// 412 - 前置条件不满足（如 Docker 未安装）
    PreconditionFailed(String),
    /// 500 - 内部错误
    Internal(String),
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} not found", resource),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::PreconditionFailed(msg) => {
                (StatusCode::PRECONDITION_FAILED, "precondition_failed", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorResponse::new(error_type, message);
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound(r) => write!(f, "Not found: {}", r),
            ApiError::BadRequest(m) => write!(f, "Bad request: {}", m),
            ApiError::Conflict(m) => write!(f, "Conflict: {}", m),
            ApiError::PreconditionFailed(m) => write!(f, "Precondition failed: {}", m),
            ApiError::Internal(m) => write!(f, "Internal error: {}", m),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        Self::Conflict(e.to_string())
    }
}

impl From<FlightConflict> for ApiError {
    fn from(e: FlightConflict) -> Self {
        Self::Conflict(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, key } => Self::NotFound(format!("{} '{}'", kind, key)),
            StoreError::Duplicate { .. } => Self::Conflict(e.to_string()),
            StoreError::Transition(e) => e.into(),
            StoreError::Io(_) | StoreError::Encode(_) => {
                error!(error = %e, "Store failure");
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<DeployError> for ApiError {
    fn from(e: DeployError) -> Self {
        error!(error = %e, "Config deploy failure");
        Self::Internal(e.to_string())
    }
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotFound(id) => Self::NotFound(format!("application '{}'", id)),
            WorkflowError::Transition(e) => e.into(),
            WorkflowError::Busy(e) => e.into(),
            WorkflowError::Precondition(msg) => Self::PreconditionFailed(msg),
            WorkflowError::Store(e) => e.into(),
            WorkflowError::Deploy(e) => e.into(),
            WorkflowError::Aborted(msg) => Self::Internal(msg),
        }
    }
}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;
