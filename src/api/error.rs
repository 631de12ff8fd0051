//! Mapping of engine errors onto HTTP responses.

use axum::{http::StatusCode, Json};
use serde::Serialize;

use crate::error::{ErrorKind, FlowError};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InputWarning => StatusCode::BAD_REQUEST,
        ErrorKind::NotFoundSubflowData | ErrorKind::ProjectNotExist | ErrorKind::NotFoundContents => {
            StatusCode::NOT_FOUND
        }
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::UnusableVault | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert an engine error; anything that is not a warning is logged.
pub fn api_error(err: FlowError) -> ApiError {
    let kind = err.kind();
    let status = status_for(kind);
    if err.is_warning() {
        tracing::debug!(error = %err, "Rejected input");
    } else {
        tracing::error!(kind = kind.as_str(), error = %err, "Request failed");
    }
    (
        status,
        Json(ErrorBody {
            kind: kind.as_str(),
            code: err.warning_code().map(str::to_string),
            message: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_are_bad_requests_with_code() {
        let (status, Json(body)) = api_error(FlowError::input("must_not_same_name"));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.kind, "input_warning");
        assert_eq!(body.code.as_deref(), Some("must_not_same_name"));
    }

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(
            api_error(FlowError::NotFoundSubflowData("x".into())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            api_error(FlowError::Unauthorized("x".into())).0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            api_error(FlowError::Consistency("x".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
