//! JWT 认证模块
//!
//! 提供 token 签发与校验，并作为应用层 [`IdentityVerifier`] 的实现。

use application::{IdentityError, IdentityVerifier, VerifiedIdentity};
use async_trait::async_trait;
use axum::http::HeaderMap;
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JWT Claims 结构，`sub` 即用户标识
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub iat: i64,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 签发 token，供本地开发和测试使用
    pub fn generate_token(
        &self,
        user_id: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            sub: user_id.to_owned(),
            email: email.map(str::to_owned),
            name: name.map(str::to_owned),
            iss: self.config.issuer.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, IdentityError> {
        let mut validation = Validation::default();
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|token_data| token_data.claims)
            .map_err(|err| IdentityError::InvalidToken(err.to_string()))
    }

    /// 从 headers 中提取并校验身份
    pub fn extract_identity_from_headers(
        &self,
        headers: &HeaderMap,
    ) -> Result<VerifiedIdentity, ApiError> {
        let token = bearer_token(headers)
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;
        let claims = self.verify_token(token).map_err(|err| {
            tracing::debug!(error = %err, "rejected bearer token");
            ApiError::unauthorized(err.to_string())
        })?;
        identity_from_claims(claims).map_err(|err| ApiError::unauthorized(err.to_string()))
    }
}

#[async_trait]
impl IdentityVerifier for JwtService {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        identity_from_claims(self.verify_token(token)?)
    }
}

fn identity_from_claims(claims: Claims) -> Result<VerifiedIdentity, IdentityError> {
    let user_id =
        UserId::parse(claims.sub).map_err(|err| IdentityError::InvalidToken(err.to_string()))?;
    Ok(VerifiedIdentity {
        user_id,
        email: claims.email,
        name: claims.name,
    })
}

/// `Authorization: Bearer <token>` 中的 token
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
