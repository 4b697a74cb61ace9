use super::protocol::SubmitResponse;
use crate::pipeline::{IngestError, RejectReason};
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Non-accepted outcome of an HTTP submission, rendered as a status code plus JSON body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Rejected(RejectReason),
    #[error(transparent)]
    Failed(#[from] IngestError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Rejected(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Failed(IngestError::Decode(_)) => StatusCode::BAD_REQUEST,
            AppError::Failed(e) => match e.store_error() {
                Some(StoreError::Constraint(_)) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Rejected(reason) => SubmitResponse::rejected(reason.to_string()),
            AppError::Failed(e) => SubmitResponse::failed(e.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
