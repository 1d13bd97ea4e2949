//! Error types for the GPU service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::ErrorResponse;
use thiserror::Error;

/// An upload that cannot be used as an operand.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BadInputError(pub String);

/// Failures on the compute device. Fatal for the request, never retried.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No compute device available: {0}")]
    Unavailable(String),

    #[error("Device transfer failed: {0}")]
    Transfer(String),

    #[error("Kernel launch failed: {0}")]
    Launch(String),

    #[error("Array of {0} elements exceeds the kernel index range")]
    TooLarge(usize),
}

/// Failures of the `nvidia-smi` probe. Reported in a 200 body, never as a fault.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    ExitStatus {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("unparsable probe output line {line:?}: {reason}")]
    Parse { line: String, reason: String },

    #[error("probe task failed: {0}")]
    Join(String),
}

/// Errors surfaced by the `/add` handler.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    BadInput(#[from] BadInputError),

    #[error("Missing upload field: {0}")]
    MissingField(&'static str),

    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Add task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    pub fn bad_input(msg: impl Into<String>) -> Self {
        ServiceError::BadInput(BadInputError(msg.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::BadInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Device(_) | ServiceError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("/add failed: {}", self);
        } else {
            tracing::debug!("/add rejected: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}
