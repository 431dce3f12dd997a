//! 进度事件模型
//!
//! 工作流产生、事件流消费，不持久化

use serde::Serialize;

/// 终止事件名称
pub const DONE_EVENT: &str = "done";

/// 工作流最终结果
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Error
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// 进度事件
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ProgressEvent {
    /// 可选事件类型（如终止事件 `done`）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub data: String,
}

impl ProgressEvent {
    /// 普通进度行
    pub fn line(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: sanitize(data.into()),
        }
    }

    /// 终止事件
    pub fn done(outcome: Outcome) -> Self {
        Self {
            event: Some(DONE_EVENT.to_string()),
            data: outcome.as_str().to_string(),
        }
    }

    /// 是否为终止事件
    pub fn is_terminal(&self) -> bool {
        self.event.as_deref() == Some(DONE_EVENT)
    }

}

/// 去掉回车符，事件流中回车是分隔符
fn sanitize(data: String) -> String {
    if data.contains('\r') {
        data.replace('\r', "")
    } else {
        data
    }
}
