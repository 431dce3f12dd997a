//! 安全检查结果模型

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 单项检查结果
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CheckResult {
    /// 检查通过，无需修复
    AlreadySecure,
    /// 已修复
    Fixed,
    /// 修复失败
    Failed { message: String },
}

impl CheckResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, CheckResult::Failed { .. })
    }
}

/// 单项检查报告
#[derive(Clone, Debug, Serialize)]
pub struct CheckOutcome {
    pub id: String,
    pub description: String,
    #[serde(flatten)]
    pub result: CheckResult,
}

/// 一次安全修复的完整报告
#[derive(Clone, Debug, Serialize)]
pub struct SecurityReport {
    pub checks: Vec<CheckOutcome>,
    pub finished_at: DateTime<Utc>,
}

impl SecurityReport {
    pub fn new(checks: Vec<CheckOutcome>) -> Self {
        Self {
            checks,
            finished_at: Utc::now(),
        }
    }

    /// 没有任何失败项时才算成功
    pub fn success(&self) -> bool {
        !self.checks.iter().any(|c| c.result.is_failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, result: CheckResult) -> CheckOutcome {
        CheckOutcome {
            id: id.to_string(),
            description: id.to_string(),
            result,
        }
    }

    #[test]
    fn test_report_success() {
        let report = SecurityReport::new(vec![
            outcome("a", CheckResult::AlreadySecure),
            outcome("b", CheckResult::Fixed),
        ]);
        assert!(report.success());

        let report = SecurityReport::new(vec![
            outcome("a", CheckResult::Fixed),
            outcome(
                "b",
                CheckResult::Failed {
                    message: "exit 1".to_string(),
                },
            ),
        ]);
        assert!(!report.success());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(outcome(
            "firewall",
            CheckResult::Failed {
                message: "ufw missing".to_string(),
            },
        ))
        .unwrap();
        assert_eq!(json["result"], "failed");
        assert_eq!(json["message"], "ufw missing");
        assert_eq!(json["id"], "firewall");
    }
}
