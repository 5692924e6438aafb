use thiserror::Error;

use crate::provider::Provider;

/// 操作失败的轮转语义分类，与具体提供商 SDK 的错误类型解耦。
///
/// 调用方在操作闭包里把 SDK 错误翻译成 [`OperationError`]，执行器只看
/// 这里的分类来决定换键重试还是立即终止。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 提供商明确拒绝了凭证本身（401/403 一类）：对该凭证是终态。
    InvalidCredential,
    /// 提供商侧配额用尽或限流（429 一类）：换下一个凭证有望成功。
    QuotaExceeded,
    /// 与凭证无关的失败（请求非法、后端内部错误、调用方取消）：
    /// 换键只会把同样的失败复制到整池凭证上。
    NonRecoverable,
}

impl FailureKind {
    /// 该类失败是否应继续尝试池中的下一个凭证。
    pub fn rotates(self) -> bool {
        matches!(self, Self::InvalidCredential | Self::QuotaExceeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid_credential",
            Self::QuotaExceeded => "quota_exceeded",
            Self::NonRecoverable => "non_recoverable",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 操作闭包上报的结构化错误。
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct OperationError {
    pub kind: FailureKind,
    /// 提供商返回的 HTTP 状态码（若有，随失败记录进日志）。
    pub status: Option<u16>,
    pub message: String,
}

impl OperationError {
    pub fn invalid_credential(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InvalidCredential,
            status: None,
            message: message.into(),
        }
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::QuotaExceeded,
            status: None,
            message: message.into(),
        }
    }

    /// 限流与配额用尽在轮转语义上等价，统一归入 QuotaExceeded。
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::quota_exceeded(message)
    }

    pub fn non_recoverable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::NonRecoverable,
            status: None,
            message: message.into(),
        }
    }

    /// 调用方取消或超时：按不可换键处理，调用方已经不需要任何答案了。
    pub fn cancelled() -> Self {
        Self::non_recoverable("操作被调用方取消")
    }

    /// 按 HTTP 状态码归类：401/403 视为凭证失效，429 视为配额受限，
    /// 其余状态码一律不换键。
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => FailureKind::InvalidCredential,
            429 => FailureKind::QuotaExceeded,
            _ => FailureKind::NonRecoverable,
        };
        Self {
            kind,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl From<anyhow::Error> for OperationError {
    /// 未归类错误的兜底：宁可停止，也不拿注定失败的请求烧掉整池凭证。
    fn from(err: anyhow::Error) -> Self {
        Self {
            kind: FailureKind::NonRecoverable,
            status: None,
            message: format!("{err:#}"),
        }
    }
}

/// 单个候选凭证的失败记录，聚合进 [`ExecuteError::AllCandidatesFailed`]。
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    /// 凭证摘要（非完整密钥）。
    pub credential: String,
    pub kind: FailureKind,
    pub message: String,
}

/// `Executor::execute` 的失败结果。
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// 未发起任何尝试：池中没有能承载本次容量的凭证。
    /// `configured == 0` 说明该提供商根本没配置凭证，而不是余量耗尽。
    #[error("提供商 {provider} 无可承载本次请求的凭证（已配置 {configured} 个）")]
    ExhaustedPool {
        provider: Provider,
        configured: usize,
    },

    /// 候选全部尝试过且全部失败，携带每个候选的失败原因。
    #[error("提供商 {provider} 的 {} 个候选凭证全部失败，最后错误: {}", .failures.len(), last_failure_message(.failures))]
    AllCandidatesFailed {
        provider: Provider,
        failures: Vec<AttemptFailure>,
    },

    /// 不可换键重试的失败：原样上抛，不再消耗后续候选。
    #[error("提供商 {provider} 请求失败（已尝试 {attempted} 个凭证）: {source}")]
    NonRecoverable {
        provider: Provider,
        attempted: usize,
        source: OperationError,
    },
}

impl ExecuteError {
    pub fn provider(&self) -> Provider {
        match self {
            Self::ExhaustedPool { provider, .. }
            | Self::AllCandidatesFailed { provider, .. }
            | Self::NonRecoverable { provider, .. } => *provider,
        }
    }

    /// 实际发起过的尝试次数。
    pub fn attempted(&self) -> usize {
        match self {
            Self::ExhaustedPool { .. } => 0,
            Self::AllCandidatesFailed { failures, .. } => failures.len(),
            Self::NonRecoverable { attempted, .. } => *attempted,
        }
    }

    /// 稍后重试是否可能成功。池内无余量和候选全挂都属于"等窗口滚动或
    /// 运维补键后可恢复"；NonRecoverable 是请求自身的问题，重试无意义。
    pub fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            Self::ExhaustedPool { .. } | Self::AllCandidatesFailed { .. }
        )
    }
}

fn last_failure_message(failures: &[AttemptFailure]) -> String {
    failures
        .last()
        .map(|f| f.message.clone())
        .unwrap_or_else(|| "无失败记录".to_string())
}
