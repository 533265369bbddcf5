use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::identity::IdentityError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("{0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    /// 存储或身份校验暂时不可用，由调用方决定是否重试
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
}

impl ApplicationError {
    /// 稳定错误码，供 HTTP 响应与 `messageError` 使用
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(err) => err.code(),
            ApplicationError::Repository(RepositoryError::NotFound) => "NOT_FOUND",
            ApplicationError::Repository(_) => "REPOSITORY_ERROR",
            ApplicationError::Unavailable(_) => "UNAVAILABLE",
            ApplicationError::Authentication(_) => "AUTHENTICATION_FAILED",
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Storage { message } => ApplicationError::Unavailable(message),
            other => ApplicationError::Repository(other),
        }
    }
}

impl From<IdentityError> for ApplicationError {
    fn from(value: IdentityError) -> Self {
        match value {
            IdentityError::InvalidToken(reason) => ApplicationError::Authentication(reason),
            IdentityError::Unavailable(reason) => ApplicationError::Unavailable(reason),
        }
    }
}
