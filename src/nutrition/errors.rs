use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use super::dto::ResponseEnvelope;
use crate::gemini::ModelClientError;

/// Linear pipeline stages. A failure at any stage ends the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validating,
    Extracting,
    Parsing,
    Completed,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no image uploaded")]
    MissingImage,
    #[error("image exceeds the upload size limit")]
    ImageTooLarge,
    #[error("upstream did not accept the image: {0}")]
    UploadRejected(String),
    #[error("external service error: {message}")]
    ExternalService { message: String, timeout: bool },
    #[error("model returned no output")]
    EmptyModelOutput,
    #[error("model output is not a valid macro record: {0}")]
    MalformedModelOutput(String),
}

impl AnalysisError {
    pub fn stage(&self) -> Stage {
        match self {
            AnalysisError::MissingImage | AnalysisError::ImageTooLarge => Stage::Validating,
            AnalysisError::UploadRejected(_) | AnalysisError::ExternalService { .. } => {
                Stage::Extracting
            }
            AnalysisError::EmptyModelOutput | AnalysisError::MalformedModelOutput(_) => {
                Stage::Parsing
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AnalysisError::MissingImage => StatusCode::BAD_REQUEST,
            AnalysisError::ImageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AnalysisError::ExternalService { timeout: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            AnalysisError::UploadRejected(_)
            | AnalysisError::ExternalService { .. }
            | AnalysisError::EmptyModelOutput
            | AnalysisError::MalformedModelOutput(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable client-facing message. Details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            AnalysisError::MissingImage => "No File Uploaded",
            AnalysisError::ImageTooLarge => "Image Too Large",
            AnalysisError::UploadRejected(_) => "Image Upload Rejected",
            AnalysisError::ExternalService { timeout: true, .. } => "External Service Timeout",
            AnalysisError::ExternalService { .. } => "External Service Error",
            AnalysisError::EmptyModelOutput => "Empty Model Output",
            AnalysisError::MalformedModelOutput(_) => "Malformed Model Output",
        }
    }

    pub fn envelope(&self) -> ResponseEnvelope {
        ResponseEnvelope::failure(self.public_message())
    }
}

impl From<ModelClientError> for AnalysisError {
    fn from(e: ModelClientError) -> Self {
        let timeout = matches!(e, ModelClientError::Timeout);
        AnalysisError::ExternalService {
            message: e.to_string(),
            timeout,
        }
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.envelope())).into_response()
    }
}
