use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use super::dto::MacroRecord;
use super::errors::AnalysisError;

fn strip_code_fence(raw: &str) -> &str {
    lazy_static! {
        static ref FENCE_RE: Regex =
            Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*```$").unwrap();
    }
    FENCE_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or(raw, |m| m.as_str().trim())
}

fn text_field(map: &Map<String, Value>, key: &str) -> Result<String, AnalysisError> {
    let text = match map.get(key) {
        None | Some(Value::Null) => {
            return Err(AnalysisError::MalformedModelOutput(format!(
                "missing field `{key}`"
            )))
        }
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(_) => {
            return Err(AnalysisError::MalformedModelOutput(format!(
                "field `{key}` is not a scalar"
            )))
        }
    };
    if text.is_empty() {
        return Err(AnalysisError::MalformedModelOutput(format!(
            "field `{key}` is empty"
        )));
    }
    Ok(text)
}

/// Turns raw model text into a complete [`MacroRecord`]. All four fields are required.
pub fn parse(raw: Option<&str>) -> Result<MacroRecord, AnalysisError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(AnalysisError::EmptyModelOutput)?;

    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(AnalysisError::EmptyModelOutput);
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| AnalysisError::MalformedModelOutput(format!("invalid JSON: {e}")))?;
    let Value::Object(map) = value else {
        return Err(AnalysisError::MalformedModelOutput(
            "expected a JSON object".into(),
        ));
    };

    Ok(MacroRecord {
        calories: text_field(&map, "calories")?,
        protein: text_field(&map, "protein")?,
        carbs: text_field(&map, "carbs")?,
        fat: text_field(&map, "fat")?,
    })
}
