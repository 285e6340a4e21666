use lazy_static::lazy_static;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use super::dto::UploadedImage;
use super::errors::AnalysisError;
use crate::gemini::{GenerateRequest, ModelClient};

/// Fixed instruction + output schema sent with every generation request.
pub struct ExtractionPrompt {
    pub system_instruction: &'static str,
    pub response_mime_type: &'static str,
}

pub const EXTRACTION_PROMPT: ExtractionPrompt = ExtractionPrompt {
    system_instruction: "You are a food macro and calorie extractor. You will be given an image \
        of food and must estimate its macros: calories, protein, carbs and fat. Return raw JSON \
        in exactly this shape: {\"calories\", \"protein\", \"carbs\", \"fat\"}, where every value \
        is a short string such as \"250 kcal\" or \"12g\".",
    response_mime_type: "application/json",
};

impl ExtractionPrompt {
    pub fn response_schema(&self) -> &'static Value {
        lazy_static! {
            static ref MACRO_SCHEMA: Value = json!({
                "type": "OBJECT",
                "properties": {
                    "calories": { "type": "STRING" },
                    "protein": { "type": "STRING" },
                    "carbs": { "type": "STRING" },
                    "fat": { "type": "STRING" }
                },
                "required": ["calories", "protein", "carbs", "fat"],
                "propertyOrdering": ["calories", "protein", "carbs", "fat"]
            });
        }
        &*MACRO_SCHEMA
    }
}

pub struct NutritionExtractor {
    client: Arc<dyn ModelClient>,
    model: String,
    permits: Semaphore,
}

impl NutritionExtractor {
    pub fn new(client: Arc<dyn ModelClient>, model: impl Into<String>, max_in_flight: usize) -> Self {
        Self {
            client,
            model: model.into(),
            permits: Semaphore::new(max_in_flight.clamp(1, Semaphore::MAX_PERMITS)),
        }
    }

    /// Upload, then one generation call. Single attempt; failures surface immediately.
    #[instrument(skip_all, fields(bytes = image.bytes.len(), mime_type = %image.mime_type))]
    pub async fn extract(&self, image: UploadedImage) -> Result<Option<String>, AnalysisError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| AnalysisError::ExternalService {
                message: e.to_string(),
                timeout: false,
            })?;

        let remote = self
            .client
            .upload_file(image.bytes, &image.mime_type)
            .await?;

        let (file_uri, file_mime_type) = match (remote.uri, remote.mime_type) {
            (Some(uri), Some(mime)) if !uri.is_empty() && !mime.is_empty() => (uri, mime),
            (uri, mime) => {
                warn!(?uri, ?mime, "upload returned an incomplete file handle");
                return Err(AnalysisError::UploadRejected(
                    "upload response is missing the file uri or mime type".into(),
                ));
            }
        };
        debug!(%file_uri, %file_mime_type, "image uploaded");

        let request = GenerateRequest {
            model: self.model.clone(),
            file_uri,
            file_mime_type,
            system_instruction: EXTRACTION_PROMPT.system_instruction.into(),
            response_mime_type: EXTRACTION_PROMPT.response_mime_type.into(),
            response_schema: EXTRACTION_PROMPT.response_schema().clone(),
        };

        let text = self.client.generate_content(&request).await?;
        debug!(chars = text.as_ref().map(|t| t.len()), "model responded");
        Ok(text)
    }
}
