//! JWT 认证和授权模块
//!
//! 提供 JWT token 生成、验证，以及从请求头解析调用方身份的提取器。

use application::{AuthError, Authorizer};
use axum::{extract::FromRequestParts, http::request::Parts};
use config::JwtConfig;
use domain::{Caller, Role, UserId};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, state::AppState};

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub name: String,
    pub role: String,
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

    /// 是否开放开发用的签发接口
    pub fn allows_dev_tokens(&self) -> bool {
        self.config.allow_dev_tokens
    }

    /// 生成 JWT token
    pub fn generate_token(&self, caller: &Caller) -> Result<String, AuthError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            sub: caller.user_id.0,
            name: caller.display_name.clone(),
            role: caller.role.as_str().to_string(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::Issue(err.to_string()))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| AuthError::Forbidden(err.to_string()))
    }
}

impl Authorizer for JwtService {
    fn authorize(&self, credential: Option<&str>) -> Result<Caller, AuthError> {
        let credential = credential
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::Unauthorized)?;
        let token = credential.strip_prefix("Bearer ").unwrap_or(credential);

        let claims = self.verify_token(token)?;
        Ok(Caller {
            user_id: UserId(claims.sub),
            display_name: claims.name,
            role: Role::new(claims.role),
        })
    }
}

/// 已认证的调用方
pub struct Authenticated(pub Caller);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let caller = state.jwt_service.authorize(header).map_err(|err| {
            tracing::debug!(error = %err, "请求认证失败");
            ApiError::from(err)
        })?;
        Ok(Authenticated(caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new(JwtConfig {
            secret: "test-secret-key-with-at-least-32-characters".into(),
            expiration_hours: 1,
            allow_dev_tokens: true,
        })
    }

    fn caller() -> Caller {
        Caller {
            user_id: UserId(7),
            display_name: "Ana".into(),
            role: Role::supervisor(),
        }
    }

    #[test]
    fn issued_token_round_trips_to_caller() {
        let service = service();
        let token = service.generate_token(&caller()).unwrap();
        let header = format!("Bearer {token}");
        assert_eq!(service.authorize(Some(&header)).unwrap(), caller());
        // 原始 token 也接受
        assert_eq!(service.authorize(Some(&token)).unwrap(), caller());
    }

    #[test]
    fn missing_credential_is_unauthorized() {
        assert_eq!(service().authorize(None), Err(AuthError::Unauthorized));
        assert_eq!(service().authorize(Some("  ")), Err(AuthError::Unauthorized));
    }

    #[test]
    fn malformed_or_foreign_token_is_forbidden() {
        let service = service();
        assert!(matches!(
            service.authorize(Some("Bearer not.a.jwt")),
            Err(AuthError::Forbidden(_))
        ));

        let other = JwtService::new(JwtConfig {
            secret: "another-secret-key-with-at-least-32-characters".into(),
            expiration_hours: 1,
            allow_dev_tokens: false,
        });
        let token = other.generate_token(&caller()).unwrap();
        assert!(matches!(
            service.authorize(Some(&token)),
            Err(AuthError::Forbidden(_))
        ));
    }
}
