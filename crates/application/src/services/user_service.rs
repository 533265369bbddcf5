use std::sync::Arc;

use domain::{DomainError, User};

use crate::{
    clock::Clock, error::ApplicationError, identity::VerifiedIdentity,
    repository::UserRepository,
};

/// 用户目录：把身份提供方的用户同步到本地，供会话参与者校验与展示
pub struct UserService {
    user_repository: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
}

impl UserService {
    pub fn new(user_repository: Arc<dyn UserRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            user_repository,
            clock,
        }
    }

    /// 按身份 upsert 用户，用户名取 name，缺省时回退到 email
    pub async fn sync_user(&self, identity: &VerifiedIdentity) -> Result<User, ApplicationError> {
        let user = User::new(
            identity.user_id.clone(),
            identity.display_name(),
            identity.email.clone(),
            self.clock.now(),
        )?;
        let stored = self.user_repository.upsert(user).await?;
        tracing::info!(user_id = %stored.id, username = %stored.username, "user synced");
        Ok(stored)
    }

    pub async fn me(&self, identity: &VerifiedIdentity) -> Result<User, ApplicationError> {
        self.user_repository
            .find_by_id(&identity.user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("user").into())
    }

    pub async fn list_others(&self, identity: &VerifiedIdentity) -> Result<Vec<User>, ApplicationError> {
        Ok(self.user_repository.list_except(&identity.user_id).await?)
    }
}
