use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
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

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// `POST /messages/send` 的错误：校验类错误仍为 4xx，其余一律 500
    pub fn send_failure(error: ApplicationError) -> Self {
        let code = error.code();
        let mapped = Self::from(error);
        if mapped.status.is_client_error() {
            return mapped;
        }
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, mapped.body.message)
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let code = error.code();
        let message = error.to_string();

        let status = match &error {
            ApplicationError::Domain(domain) => match domain {
                DomainError::InvalidParticipants { .. }
                | DomainError::ParticipantMismatch
                | DomainError::InvalidContent { .. }
                | DomainError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
                DomainError::UnauthorizedSender => StatusCode::UNAUTHORIZED,
                DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
            },
            ApplicationError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            ApplicationError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
            ApplicationError::Repository(RepositoryError::Storage { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApplicationError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApplicationError::Authentication(_) => StatusCode::UNAUTHORIZED,
        };

        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        }

        ApiError::new(status, code, message)
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
    fn domain_errors_map_to_client_statuses() {
        let cases = [
            (DomainError::invalid_participants("self"), StatusCode::BAD_REQUEST),
            (DomainError::ParticipantMismatch, StatusCode::BAD_REQUEST),
            (DomainError::invalid_content("empty"), StatusCode::BAD_REQUEST),
            (DomainError::UnauthorizedSender, StatusCode::UNAUTHORIZED),
            (DomainError::not_found("user"), StatusCode::NOT_FOUND),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(ApplicationError::from(error)).status(), status);
        }
    }

    #[test]
    fn send_failures_other_than_validation_are_internal_errors() {
        let unavailable = ApiError::send_failure(ApplicationError::Unavailable("db down".into()));
        assert_eq!(unavailable.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(unavailable.body.code, "UNAVAILABLE");

        let invalid = ApiError::send_failure(DomainError::invalid_content("empty").into());
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let read = ApiError::from(ApplicationError::Unavailable("db down".into()));
        assert_eq!(read.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
