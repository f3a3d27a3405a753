use application::ApplicationError;
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

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;

        match error {
            AppErr::Unauthorized => ApiError::unauthorized("authentication failed"),
            AppErr::Domain(DomainError::PermissionDenied { action }) => ApiError::new(
                StatusCode::FORBIDDEN,
                "PERMISSION_DENIED",
                format!("permission denied: {}", action),
            ),
            AppErr::Domain(DomainError::ResourceNotFound {
                resource_type,
                resource_id,
            }) => ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} {} not found", resource_type, resource_id),
            ),
            AppErr::Domain(DomainError::ValidationError { field, message }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{}: {}", field, message),
            ),
            AppErr::Domain(err @ (DomainError::TaskError { .. } | DomainError::StorageError { .. })) => {
                ApiError::internal_server_error(err.to_string())
            }
            AppErr::RegistryClosed => ApiError::service_unavailable("server is shutting down"),
            err @ (AppErr::ConnectionNotFound(_)
            | AppErr::ConnectionAlreadyRegistered(_)
            | AppErr::UserNotConnected(_)) => {
                ApiError::new(StatusCode::CONFLICT, "CONNECTION_STATE", err.to_string())
            }
            AppErr::Infrastructure(message) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INFRASTRUCTURE_ERROR",
                message,
            ),
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

    #[test]
    fn application_errors_map_to_status_codes() {
        let cases = [
            (ApplicationError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                ApplicationError::Domain(DomainError::permission_denied("join")),
                StatusCode::FORBIDDEN,
            ),
            (
                ApplicationError::Domain(DomainError::resource_not_found("task", "1")),
                StatusCode::NOT_FOUND,
            ),
            (ApplicationError::RegistryClosed, StatusCode::SERVICE_UNAVAILABLE),
            (
                ApplicationError::UserNotConnected(domain::UserId::random()),
                StatusCode::CONFLICT,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }
}
