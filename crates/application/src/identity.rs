//! 外部身份校验接口
//!
//! 核心只把凭证当作不透明字符串交给 [`IdentityVerifier`]，从不解析其内部结构。

use async_trait::async_trait;
use domain::UserId;
use thiserror::Error;

/// 校验通过的身份，作为能力参数显式传入每个核心操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: UserId,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl VerifiedIdentity {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
            name: None,
        }
    }

    /// 同步到用户目录时使用的显示名：name → email → user id
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| self.user_id.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError>;
}
