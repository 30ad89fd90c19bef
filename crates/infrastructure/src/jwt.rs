//! JWT令牌校验
//!
//! 连接握手时出示的访问令牌由账号服务签发，这里只做本地校验：
//! 签名、过期时间，以及sub字段中的用户ID。

use application::{ApplicationError, TokenVerifier};
use async_trait::async_trait;
use domain::UserId;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// 用户ID
    sub: String,
    /// 过期时间（unix秒）
    exp: usize,
}

pub struct JwtTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, ApplicationError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| ApplicationError::Authentication(format!("令牌无效: {}", err)))?;

        let user_id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| ApplicationError::Authentication("令牌sub不是有效的用户ID".to_string()))?;
        Ok(UserId::from(user_id))
    }
}
