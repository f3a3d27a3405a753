//! JWT 认证模块
//!
//! 提供 JWT token 生成、验证，以及连接握手时的身份校验（Identity Gate）：
//! 校验签名和有效期，再确认用户存在且处于激活状态。任何一步失败都是同一个 401。

use std::sync::Arc;

use axum::http::HeaderMap;
use config::JwtConfig;
use domain::{UserDirectory, UserId};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(alias = "userId")]
    pub user_id: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// 身份校验失败的具体原因，只用于日志；对外统一为 Unauthorized
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    Expired,
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("user {0} is deactivated")]
    UserInactive(UserId),
    #[error("user lookup failed: {0}")]
    Lookup(String),
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        tracing::warn!(reason = %error, "authentication rejected");
        ApiError::unauthorized("authentication failed")
    }
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

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);
        self.generate_token_expiring_at(user_id, exp.timestamp())
    }

    /// 指定过期时间生成 token
    pub fn generate_token_expiring_at(&self, user_id: UserId, exp: i64) -> Result<String, ApiError> {
        let claims = Claims {
            user_id: user_id.into(),
            exp,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(err.to_string()),
            })
    }
}

/// 从 Authorization 头中取出 Bearer token
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::InvalidToken("invalid authorization header format".to_string()))
}

/// 连接握手时的身份校验
#[derive(Clone)]
pub struct IdentityGate {
    jwt: Arc<JwtService>,
    users: Arc<dyn UserDirectory>,
}

impl IdentityGate {
    pub fn new(jwt: Arc<JwtService>, users: Arc<dyn UserDirectory>) -> Self {
        Self { jwt, users }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// 校验 token 并确认用户存在且处于激活状态
    pub async fn authenticate(&self, token: Option<&str>) -> Result<UserId, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let claims = self.jwt.verify_token(token)?;
        let user_id = UserId::from(claims.user_id);

        let account = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(|err| AuthError::Lookup(err.to_string()))?
            .ok_or(AuthError::UserNotFound(user_id))?;
        if !account.is_active {
            return Err(AuthError::UserInactive(user_id));
        }

        Ok(user_id)
    }

    /// 从 HTTP 请求头认证
    pub async fn authenticate_headers(&self, headers: &HeaderMap) -> Result<UserId, AuthError> {
        let token = bearer_token(headers)?;
        self.authenticate(Some(token)).await
    }
}
