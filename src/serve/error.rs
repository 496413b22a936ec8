use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::{Error, ValidationError};

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("request was malformed: {0}")]
    MalformedRequest(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("symphony error: {0}")]
    Symphony(#[from] Error),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::Symphony(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            ServeError::MalformedRequest(_) | ServeError::Symphony(Error::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            ServeError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationError> for ServeError {
    fn from(e: ValidationError) -> Self {
        ServeError::MalformedRequest(e.to_string())
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();

        let string = match &self {
            ServeError::Symphony(Error::NotFound(what)) => format!("{what} not found"),
            ServeError::MalformedRequest(e) => format!("unable to parse request parameters: {e}"),
            ServeError::Symphony(Error::Validation(e)) => {
                format!("unable to parse request parameters: {e}")
            }
            ServeError::Unauthorized => self.to_string(),
            _ => {
                error!("internal server error: {}", self);
                "internal server error".to_string()
            }
        };

        (
            status,
            Json(json!({
                "error": string
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        let cases = [
            (ServeError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                Error::not_found("wallet 00").into(),
                StatusCode::NOT_FOUND,
            ),
            (
                ValidationError::LimitTooLarge {
                    requested: 501,
                    max: 500,
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::Validation(ValidationError::InvalidTxid("00".into())).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::WriterDisconnected.into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
