//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 部署状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Building,
    Deploying,
    Deployed,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Deployed | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }

    /// 是否已越过构建阶段（此后必须有镜像地址）
    pub fn is_past_build(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Deploying | DeploymentStatus::Deployed | DeploymentStatus::RolledBack
        )
    }

    /// 状态转换是否合法
    ///
    /// 流水线只能前进；`deployed -> rolled_back` 是唯一离开终态的转换，仅由手动回滚触发
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (self, next) {
            (a, b) if *a == b => !a.is_terminal(),
            (Pending, Building) | (Pending, Failed) => true,
            (Building, Deploying) | (Building, Failed) => true,
            (Deploying, Deployed) | (Deploying, Failed) => true,
            (Deployed, RolledBack) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 部署记录不变量被破坏
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordViolation {
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("deployment is terminal ({0}) and cannot be modified")]
    Terminal(DeploymentStatus),

    #[error("{0} update is not an append to the existing log")]
    LogTruncated(&'static str),

    #[error("image_url must be set exactly when status is past the build stage (status {0})")]
    ImageMismatch(DeploymentStatus),

    #[error("image_url cannot change once set")]
    ImageChanged,

    #[error("completed_at must be set exactly when status is terminal (status {0})")]
    CompletionMismatch(DeploymentStatus),
}

/// 部署记录
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: String,
    pub application_id: String,
    /// 版本标签（自由格式）
    pub version: String,
    pub status: DeploymentStatus,
    pub build_logs: Option<String>,
    pub deploy_logs: Option<String>,
    pub image_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// 创建新部署（pending）
    pub fn new(
        id: impl Into<String>,
        application_id: impl Into<String>,
        version: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            application_id: application_id.into(),
            version: version.into(),
            status: DeploymentStatus::Pending,
            build_logs: None,
            deploy_logs: None,
            image_url: None,
            started_at,
            completed_at: None,
        }
    }

    /// 应用一次更新
    ///
    /// 先在副本上校验全部不变量，失败时记录保持不变
    pub fn apply(&mut self, update: DeploymentUpdate) -> Result<(), RecordViolation> {
        let from = self.status;
        let to = update.status.unwrap_or(from);

        if from.is_terminal() && !(from == DeploymentStatus::Deployed && to == DeploymentStatus::RolledBack) {
            return Err(RecordViolation::Terminal(from));
        }
        if to != from && !from.can_transition_to(to) {
            return Err(RecordViolation::InvalidTransition { from, to });
        }

        let mut next = self.clone();
        next.status = to;

        if let Some(logs) = update.build_logs {
            check_append(next.build_logs.as_deref(), &logs, "build_logs")?;
            next.build_logs = Some(logs);
        }
        if let Some(logs) = update.deploy_logs {
            check_append(next.deploy_logs.as_deref(), &logs, "deploy_logs")?;
            next.deploy_logs = Some(logs);
        }
        if let Some(image) = update.image_url {
            match next.image_url.as_deref() {
                Some(existing) if existing != image => return Err(RecordViolation::ImageChanged),
                _ => next.image_url = Some(image),
            }
        }
        if let Some(completed_at) = update.completed_at {
            if next.completed_at.is_none() {
                next.completed_at = Some(completed_at);
            }
        }

        // 失败记录可能在构建阶段之后才失败，此时保留镜像地址
        let image_ok = match to {
            DeploymentStatus::Pending | DeploymentStatus::Building => next.image_url.is_none(),
            DeploymentStatus::Failed => true,
            _ => next.image_url.is_some(),
        };
        if !image_ok {
            return Err(RecordViolation::ImageMismatch(to));
        }
        if next.completed_at.is_some() != to.is_terminal() {
            return Err(RecordViolation::CompletionMismatch(to));
        }

        *self = next;
        Ok(())
    }
}

fn check_append(existing: Option<&str>, next: &str, field: &'static str) -> Result<(), RecordViolation> {
    match existing {
        Some(prev) if !next.starts_with(prev) => Err(RecordViolation::LogTruncated(field)),
        _ => Ok(()),
    }
}

/// 部署记录的部分更新
///
/// 日志字段携带完整文本，必须以已有内容为前缀
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DeploymentUpdate {
    pub status: Option<DeploymentStatus>,
    pub build_logs: Option<String>,
    pub deploy_logs: Option<String>,
    pub image_url: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 日志级别
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// 日志行
#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub content: String,
}

impl LogLine {
    /// 创建新日志行
    ///
    /// 多行内容（如命令 stderr）折叠为一行，片段之间用 ` | ` 分隔
    pub fn new(timestamp: DateTime<Utc>, level: LogLevel, content: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            content: single_line(content.into()),
        }
    }

    pub fn info(timestamp: DateTime<Utc>, content: impl Into<String>) -> Self {
        Self::new(timestamp, LogLevel::Info, content)
    }

    pub fn error(timestamp: DateTime<Utc>, content: impl Into<String>) -> Self {
        Self::new(timestamp, LogLevel::Error, content)
    }
}

fn single_line(content: String) -> String {
    if !content.contains(['\n', '\r']) {
        return content;
    }
    content
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

impl std::fmt::Display for LogLine {
    /// `[2024-05-01T08:00:00Z] [INFO] message`
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            self.level.as_str(),
            self.content
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn building() -> Deployment {
        let mut d = Deployment::new("d-1", "app-1", "v1", at(0));
        d.apply(DeploymentUpdate {
            status: Some(DeploymentStatus::Building),
            build_logs: Some("a\n".into()),
            ..Default::default()
        })
        .unwrap();
        d
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(!DeploymentStatus::Pending.is_terminal());
        assert!(!DeploymentStatus::Deploying.is_terminal());
        assert!(DeploymentStatus::Deployed.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(DeploymentStatus::RolledBack.is_terminal());
        assert_eq!(DeploymentStatus::RolledBack.as_str(), "rolled_back");
    }

    #[test]
    fn test_transitions_forward_only() {
        use DeploymentStatus::*;
        assert!(Pending.can_transition_to(Building));
        assert!(Building.can_transition_to(Deploying));
        assert!(Deploying.can_transition_to(Deployed));
        assert!(Building.can_transition_to(Failed));
        assert!(Deployed.can_transition_to(RolledBack));

        assert!(!Deploying.can_transition_to(Building));
        assert!(!Pending.can_transition_to(Deployed));
        assert!(!Failed.can_transition_to(Deployed));
        assert!(!Failed.can_transition_to(RolledBack));
        assert!(!Deployed.can_transition_to(Deployed));
    }

    #[test]
    fn test_apply_rejects_log_truncation() {
        let mut d = building();
        let err = d
            .apply(DeploymentUpdate {
                build_logs: Some("b\n".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, RecordViolation::LogTruncated("build_logs"));
        assert_eq!(d.build_logs.as_deref(), Some("a\n"));
    }

    #[test]
    fn test_apply_requires_image_past_build() {
        let mut d = building();
        let err = d
            .apply(DeploymentUpdate {
                status: Some(DeploymentStatus::Deploying),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, RecordViolation::ImageMismatch(DeploymentStatus::Deploying));

        d.apply(DeploymentUpdate {
            status: Some(DeploymentStatus::Deploying),
            image_url: Some("r/n/app:v1".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(d.status, DeploymentStatus::Deploying);
    }

    #[test]
    fn test_apply_terminal_requires_completion_and_freezes() {
        let mut d = building();
        let err = d
            .apply(DeploymentUpdate {
                status: Some(DeploymentStatus::Failed),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, RecordViolation::CompletionMismatch(DeploymentStatus::Failed));

        d.apply(DeploymentUpdate {
            status: Some(DeploymentStatus::Failed),
            deploy_logs: Some("boom\n".into()),
            completed_at: Some(at(5)),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(d.completed_at, Some(at(5)));
        assert!(d.image_url.is_none());

        let err = d
            .apply(DeploymentUpdate {
                deploy_logs: Some("boom\nmore\n".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, RecordViolation::Terminal(DeploymentStatus::Failed));
    }

    #[test]
    fn test_log_line_format() {
        let line = LogLine::info(at(0), "Starting build");
        assert_eq!(line.to_string(), "[2023-11-14T22:13:20Z] [INFO] Starting build");

        let line = LogLine::error(at(0), "boom");
        assert!(line.to_string().ends_with("[ERROR] boom"));
    }

    #[test]
    fn test_log_line_folds_multiline_content() {
        let line = LogLine::error(
            at(0),
            "docker exited with 1: Step 1/5 : FROM x\r\nerror: pull access denied\n\n",
        );
        let text = line.to_string();
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with("[ERROR] docker exited with 1: Step 1/5 : FROM x | error: pull access denied"));
    }
}
