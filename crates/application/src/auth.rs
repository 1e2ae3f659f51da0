//! 认证协作方接口

use domain::Caller;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// 未携带凭证
    #[error("missing credentials")]
    Unauthorized,
    /// 凭证结构无效、签名错误或已过期
    #[error("invalid credentials: {0}")]
    Forbidden(String),
    #[error("token issue failed: {0}")]
    Issue(String),
}

pub trait Authorizer: Send + Sync {
    /// 从 `Authorization` 头的值解析调用方；`None` 表示未携带
    fn authorize(&self, credential: Option<&str>) -> Result<Caller, AuthError>;
}
