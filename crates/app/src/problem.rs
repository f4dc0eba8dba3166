use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use task_board_storage::StorageError;

use crate::service::ServiceError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

/// `application/problem+json` error body.
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }
}

impl From<ServiceError> for ProblemResponse {
    fn from(err: ServiceError) -> Self {
        let (status, problem_type) = match &err {
            ServiceError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ServiceError::Storage(StorageError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            ServiceError::Storage(StorageError::Constraint(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "constraint_violation")
            }
            ServiceError::Storage(StorageError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, "storage_timeout")
            }
            ServiceError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };
        // Internal failures do not leak driver messages.
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "storage failure".to_string()
        } else {
            err.to_string()
        };
        Self::new(status, problem_type, detail)
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
