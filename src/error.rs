use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

// Taken from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
#[derive(Debug)]
pub struct ServiceError {
    pub status: StatusCode,
    pub message: HttpErrorResponse,
}

#[derive(Debug, Serialize)]
pub struct HttpErrorResponse {
    error: String,
}

impl From<String> for HttpErrorResponse {
    fn from(message: String) -> Self {
        HttpErrorResponse { error: message }
    }
}

impl From<&str> for HttpErrorResponse {
    fn from(message: &str) -> Self {
        HttpErrorResponse {
            error: message.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let mut res = Json(self.message).into_response();
        *res.status_mut() = self.status;
        res
    }
}

/// Every error that reaches a handler unmapped becomes a 500 carrying its message text.
impl<E> From<E> for ServiceError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ServiceError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: HttpErrorResponse::from(err.into().to_string()),
        }
    }
}

pub type ServiceResult<T, E = ServiceError> = Result<T, E>;

/// Failure of one stage of the caption pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] image::ImageError),
    #[error("{0}")]
    Inference(anyhow::Error),
    #[error("{0}")]
    Translation(anyhow::Error),
}

#[macro_export]
macro_rules! bail_service {
    ($error_message:expr) => {
        return Err($crate::error::ServiceError {
            status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            message: $crate::error::HttpErrorResponse::from($error_message),
        })
    };
    ($status_code:expr, $error_message:expr) => {
        return Err($crate::error::ServiceError {
            status: $status_code,
            message: $crate::error::HttpErrorResponse::from($error_message),
        })
    };
    ($status:expr, $fmt:expr $(, $arg:expr)*) => {
        return Err($crate::error::ServiceError {
            status: $status,
            message: $crate::error::HttpErrorResponse::from(format!($fmt $(, $arg)*)),
        })
    };
}
