use domain::DomainError;
use thiserror::Error;

use crate::auth::AuthError;
use crate::registry::TransportError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
}
