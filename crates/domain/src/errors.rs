//! 领域模型错误定义
//!
//! 定义私信系统中所有可能的业务错误，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 自己和自己建会话，或参与者缺失/无法解析
    #[error("invalid participants: {reason}")]
    InvalidParticipants { reason: String },

    /// 消息的发送者/接收者不是会话的两位参与者
    #[error("sender and receiver do not match the conversation participants")]
    ParticipantMismatch,

    /// 消息正文为空或超长
    #[error("invalid content: {reason}")]
    InvalidContent { reason: String },

    /// 凭证解析出的用户与声明的发送者不一致
    #[error("credential does not match the claimed sender")]
    UnauthorizedSender,

    /// 资源不存在
    #[error("{resource} not found")]
    NotFound { resource: &'static str },

    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },
}

impl DomainError {
    pub fn invalid_participants(reason: impl Into<String>) -> Self {
        Self::InvalidParticipants {
            reason: reason.into(),
        }
    }

    pub fn invalid_content(reason: impl Into<String>) -> Self {
        Self::InvalidContent {
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(resource: &'static str) -> Self {
        Self::NotFound { resource }
    }

    /// 稳定的错误码，HTTP 响应和实时通道的 `messageError` 都使用它
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParticipants { .. } => "INVALID_PARTICIPANTS",
            Self::ParticipantMismatch => "PARTICIPANT_MISMATCH",
            Self::InvalidContent { .. } => "INVALID_CONTENT",
            Self::UnauthorizedSender => "UNAUTHORIZED_SENDER",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
