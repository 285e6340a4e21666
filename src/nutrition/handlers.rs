use axum::{
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        DefaultBodyLimit, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tracing::{instrument, warn};

use super::dto::ImageUpload;
use super::errors::AnalysisError;
use crate::state::AppState;

pub const IMAGE_FIELD: &str = "image";

pub fn macro_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/api/macros", post(analyze_macros))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

/// POST /api/macros (multipart)
/// Field: image (single file). Other fields are ignored.
#[instrument(skip(state, mp))]
pub async fn analyze_macros(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> Response {
    let upload = match mp {
        Ok(mp) => read_image_field(mp).await,
        Err(rejection) => {
            warn!(error = %rejection, "request is not multipart");
            Ok(None)
        }
    };

    match upload {
        Ok(upload) => {
            let (status, envelope) = state.analysis.analyze(upload).await;
            (status, Json(envelope)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn read_image_field(mut mp: Multipart) -> Result<Option<ImageUpload>, AnalysisError> {
    while let Some(field) = mp.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Some(ImageUpload {
            bytes,
            content_type,
        }));
    }
    Ok(None)
}

fn multipart_error(e: MultipartError) -> AnalysisError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(error = %e, "upload exceeds body limit");
        AnalysisError::ImageTooLarge
    } else {
        warn!(error = %e, "unreadable multipart body");
        AnalysisError::MissingImage
    }
}
