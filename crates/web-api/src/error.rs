use application::{ApplicationError, AuthError, StoreError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::DomainError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Unauthorized => ApiError::unauthorized("missing authorization header"),
            AuthError::Forbidden(reason) => ApiError::forbidden(format!("invalid token: {reason}")),
            AuthError::Issue(reason) => {
                ApiError::internal_server_error(format!("token issue failed: {reason}"))
            }
        }
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;

        match error {
            AppErr::Domain(DomainError::ValidationError { field, message }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{}: {}", field, message),
            ),
            AppErr::Domain(DomainError::PermissionDenied { action }) => ApiError::new(
                StatusCode::FORBIDDEN,
                "INSUFFICIENT_PERMISSIONS",
                format!("not allowed to {}", action),
            ),
            AppErr::Domain(DomainError::ConnectionClosed { connection_id }) => ApiError::new(
                StatusCode::CONFLICT,
                "CONNECTION_CLOSED",
                format!("connection {} is closed", connection_id),
            ),
            AppErr::Store(StoreError::NotFound { resource, id }) => ApiError::new(
                StatusCode::NOT_FOUND,
                "MESSAGE_NOT_FOUND",
                format!("{} {} not found", resource, id),
            ),
            AppErr::Store(StoreError::Storage(message)) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                format!("storage error: {}", message),
            ),
            AppErr::Auth(err) => ApiError::from(err),
            AppErr::Transport(err) => ApiError::internal_server_error(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::MessageId;

    #[test]
    fn auth_errors_map_to_401_and_403() {
        assert_eq!(
            ApiError::from(AuthError::Unauthorized).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::Forbidden("bad".into())).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn application_errors_map_to_status() {
        let not_found: ApiError =
            ApplicationError::from(StoreError::message_not_found(MessageId(1))).into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let invalid: ApiError =
            ApplicationError::from(DomainError::validation_error("text", "cannot be empty")).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let denied: ApiError =
            ApplicationError::from(DomainError::permission_denied("clear chat")).into();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    }
}
