use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::dto::{ImageUpload, MacroRecord, ResponseEnvelope};
use super::errors::{AnalysisError, Stage};
use super::extractor::NutritionExtractor;
use super::{parser, validator};
use crate::gemini::ModelClient;

/// Validate → extract → parse. Every failure ends up as a structured envelope.
pub struct AnalysisService {
    extractor: NutritionExtractor,
}

impl AnalysisService {
    pub fn new(client: Arc<dyn ModelClient>, model: impl Into<String>, max_in_flight: usize) -> Self {
        Self {
            extractor: NutritionExtractor::new(client, model, max_in_flight),
        }
    }

    #[instrument(skip_all, fields(analysis_id = %Uuid::new_v4()))]
    pub async fn analyze(&self, upload: Option<ImageUpload>) -> (StatusCode, ResponseEnvelope) {
        match self.run(upload).await {
            Ok(record) => {
                info!(stage = ?Stage::Completed, "macros extracted");
                (StatusCode::OK, ResponseEnvelope::success(record))
            }
            Err(e) => {
                if e.status().is_client_error() {
                    warn!(stage = ?e.stage(), error = %e, "analysis rejected");
                } else {
                    error!(stage = ?e.stage(), error = %e, "analysis failed");
                }
                (e.status(), e.envelope())
            }
        }
    }

    pub async fn run(&self, upload: Option<ImageUpload>) -> Result<MacroRecord, AnalysisError> {
        debug!(stage = ?Stage::Received, present = upload.is_some(), "upload received");
        let image = validator::validate(upload)?;
        let raw = self.extractor.extract(image).await?;
        parser::parse(raw.as_deref())
    }
}
