use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The file part as the transport layer handed it over, before validation.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// A validated, non-empty image ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub mime_type: String,
}

/// Macro-nutrients as display strings; the model is not held to numeric output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroRecord {
    pub calories: String,
    pub protein: String,
    pub carbs: String,
    pub fat: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub message: String,
    pub data: Option<MacroRecord>,
}

impl ResponseEnvelope {
    pub const SUCCESS: &'static str = "Success";

    pub fn success(record: MacroRecord) -> Self {
        Self {
            message: Self::SUCCESS.into(),
            data: Some(record),
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }
}
