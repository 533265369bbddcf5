use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{Timestamp, UserId};

/// 用户目录中的一条记录，`id` 即身份提供方的用户标识。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn new(
        id: UserId,
        username: impl Into<String>,
        email: Option<String>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let username = Self::validate_username(username.into())?;
        Ok(Self {
            id,
            username,
            email,
            created_at: now,
            updated_at: now,
        })
    }

    fn validate_username(value: String) -> Result<String, DomainError> {
        let value = value.trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("username", "cannot be empty"));
        }
        if value.chars().count() > 100 {
            return Err(DomainError::invalid_argument("username", "too long"));
        }
        Ok(value)
    }
}
