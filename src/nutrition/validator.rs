use super::dto::{ImageUpload, UploadedImage};
use super::errors::AnalysisError;

pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Presence and non-emptiness only. Gemini decides whether the media type is acceptable.
pub fn validate(upload: Option<ImageUpload>) -> Result<UploadedImage, AnalysisError> {
    let upload = upload.ok_or(AnalysisError::MissingImage)?;
    if upload.bytes.is_empty() {
        return Err(AnalysisError::MissingImage);
    }

    let mime_type = upload
        .content_type
        .map(|ct| ct.trim().to_string())
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.into());

    Ok(UploadedImage {
        bytes: upload.bytes,
        mime_type,
    })
}
