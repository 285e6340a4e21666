//! Thin client over the two Gemini REST calls the extraction pipeline needs:
//! the raw file upload and `generateContent`.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::GeminiConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_PROTOCOL_HEADER: &str = "X-Goog-Upload-Protocol";
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Clone, Error)]
pub enum ModelClientError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode upstream response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ModelClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ModelClientError::Timeout
        } else if e.is_decode() {
            ModelClientError::Decode(e.to_string())
        } else {
            ModelClientError::Transport(e.to_string())
        }
    }
}

/// What the upload endpoint reported back. Both fields may be missing on a partial upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFile {
    pub uri: Option<String>,
    pub mime_type: Option<String>,
}

/// A single structured-generation call against one uploaded file.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub file_uri: String,
    pub file_mime_type: String,
    pub system_instruction: String,
    pub response_mime_type: String,
    pub response_schema: serde_json::Value,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn upload_file(&self, body: Bytes, mime_type: &str)
        -> Result<RemoteFile, ModelClientError>;
    async fn generate_content(
        &self,
        request: &GenerateRequest,
    ) -> Result<Option<String>, ModelClientError>;
}

// -- wire types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: SystemInstruction<'a>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<FilePart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FilePart<'a> {
    file_data: FileData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'a str,
    response_schema: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct UploadFileResponse {
    file: Option<UploadedFileMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFileMeta {
    uri: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.api_key.trim().is_empty(),
            "Gemini API key is required"
        );

        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(&config.api_key)?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn build_generate_body(request: &GenerateRequest) -> GenerateContentBody<'_> {
        GenerateContentBody {
            contents: vec![Content {
                role: "user",
                parts: vec![FilePart {
                    file_data: FileData {
                        mime_type: &request.file_mime_type,
                        file_uri: &request.file_uri,
                    },
                }],
            }],
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: &request.system_instruction,
                }],
            },
            generation_config: GenerationConfig {
                response_mime_type: &request.response_mime_type,
                response_schema: &request.response_schema,
            },
        }
    }

    /// Concatenates the text parts of the first candidate, `None` when there are none.
    pub fn extract_text(response: &GenerateContentResponse) -> Option<String> {
        let parts = &response.candidates.first()?.content.as_ref()?.parts;
        let texts: Vec<&str> = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.concat())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ModelClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        error!(%status, body = %body, "gemini api error");
        Err(ModelClientError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn upload_file(
        &self,
        body: Bytes,
        mime_type: &str,
    ) -> Result<RemoteFile, ModelClientError> {
        let url = format!("{}/upload/v1beta/files", self.base_url);
        debug!(bytes = body.len(), mime_type, "uploading file to gemini");

        let response = self
            .client
            .post(&url)
            .header(UPLOAD_PROTOCOL_HEADER, "raw")
            .header(CONTENT_TYPE, mime_type)
            .body(body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let parsed: UploadFileResponse = response.json().await?;

        let file = parsed.file.map_or_else(RemoteFile::default, |f| RemoteFile {
            uri: f.uri,
            mime_type: f.mime_type,
        });
        debug!(uri = ?file.uri, mime_type = ?file.mime_type, "gemini upload finished");
        Ok(file)
    }

    async fn generate_content(
        &self,
        request: &GenerateRequest,
    ) -> Result<Option<String>, ModelClientError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.model
        );
        let body = Self::build_generate_body(request);

        let response = self.client.post(&url).json(&body).send().await?;
        let response = Self::check_status(response).await?;
        let parsed: GenerateContentResponse = response.json().await?;

        let text = Self::extract_text(&parsed);
        debug!(model = %request.model, chars = text.as_ref().map(|t| t.len()), "gemini generation finished");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
    use serde_json::json;

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: DEFAULT_GEMINI_MODEL.into(),
            file_uri: "https://files.example/abc".into(),
            file_mime_type: "image/png".into(),
            system_instruction: "extract macros".into(),
            response_mime_type: "application/json".into(),
            response_schema: json!({"type": "OBJECT"}),
        }
    }

    fn config(api_key: &str) -> GeminiConfig {
        GeminiConfig {
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.into(),
            timeout_secs: 5,
            max_concurrency: 1,
        }
    }

    #[test]
    fn generate_body_uses_camel_case_wire_names() {
        let body = serde_json::to_value(GeminiClient::build_generate_body(&request())).unwrap();
        let part = &body["contents"][0]["parts"][0]["fileData"];
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(part["fileUri"], "https://files.example/abc");
        assert_eq!(part["mimeType"], "image/png");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "extract macros");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn extract_text_joins_parts_of_first_candidate() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                {"content": {"parts": [{"text": "{\"calories\":"}, {"text": "\"1\"}"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }))
        .unwrap();
        assert_eq!(
            GeminiClient::extract_text(&response).as_deref(),
            Some("{\"calories\":\"1\"}")
        );
    }

    #[test]
    fn extract_text_is_none_without_candidates_or_text() {
        let empty: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(GeminiClient::extract_text(&empty).is_none());

        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert!(GeminiClient::extract_text(&blocked).is_none());

        let no_text: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": [{"content": {"parts": [{}]}}]}))
                .unwrap();
        assert!(GeminiClient::extract_text(&no_text).is_none());
    }

    #[test]
    fn upload_response_tolerates_missing_fields() {
        let parsed: UploadFileResponse =
            serde_json::from_value(json!({"file": {"name": "files/x", "uri": "u"}})).unwrap();
        let file = parsed.file.unwrap();
        assert_eq!(file.uri.as_deref(), Some("u"));
        assert!(file.mime_type.is_none());
    }

    #[test]
    fn new_rejects_blank_api_key() {
        assert!(GeminiClient::new(&config("")).is_err());
        assert!(GeminiClient::new(&config("test-key-123")).is_ok());
    }

    // -- against a local one-shot HTTP server --

    use crate::nutrition::errors::AnalysisError;
    use axum::http::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Accepts one connection, waits `delay`, answers with `status` and `body`.
    /// The handle yields the raw request it received.
    async fn serve_once(status: &'static str, body: String, delay: Duration) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            request
        });
        (format!("http://{addr}"), handle)
    }

    fn client_for(base_url: String, timeout_secs: u64) -> GeminiClient {
        GeminiClient::new(&GeminiConfig {
            api_key: "test-key".into(),
            model: "test-model".into(),
            base_url,
            timeout_secs,
            max_concurrency: 1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn upload_posts_raw_bytes_and_decodes_file_handle() {
        let (base_url, server) = serve_once(
            "200 OK",
            json!({"file": {"name": "files/a1", "uri": "u", "mimeType": "image/png"}}).to_string(),
            Duration::ZERO,
        )
        .await;
        let client = client_for(base_url, 5);

        let file = client
            .upload_file(Bytes::from_static(b"fake-png-bytes"), "image/png")
            .await
            .unwrap();
        assert_eq!(
            file,
            RemoteFile {
                uri: Some("u".into()),
                mime_type: Some("image/png".into()),
            }
        );

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /upload/v1beta/files HTTP/1.1"));
        let lower = request.to_lowercase();
        assert!(lower.contains("x-goog-upload-protocol: raw"));
        assert!(lower.contains("x-goog-api-key: test-key"));
        assert!(lower.contains("content-type: image/png"));
        assert!(request.ends_with("fake-png-bytes"));
    }

    #[tokio::test]
    async fn non_success_status_keeps_upstream_body() {
        let (base_url, server) = serve_once(
            "429 Too Many Requests",
            json!({"error": {"status": "RESOURCE_EXHAUSTED"}}).to_string(),
            Duration::ZERO,
        )
        .await;
        let client = client_for(base_url, 5);

        let err = client
            .upload_file(Bytes::from_static(b"img"), "image/jpeg")
            .await
            .unwrap_err();
        match &err {
            ModelClientError::Status { status, body } => {
                assert_eq!(*status, 429);
                assert!(body.contains("RESOURCE_EXHAUSTED"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
        assert_eq!(AnalysisError::from(err).status(), StatusCode::BAD_GATEWAY);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn stalled_upstream_times_out() {
        let (base_url, server) = serve_once("200 OK", "{}".into(), Duration::from_secs(10)).await;
        let client = client_for(base_url, 1);

        let err = client.generate_content(&request()).await.unwrap_err();
        assert!(matches!(err, ModelClientError::Timeout), "got {err:?}");

        let analysis = AnalysisError::from(err);
        assert!(matches!(analysis, AnalysisError::ExternalService { timeout: true, .. }));
        assert_eq!(analysis.status(), StatusCode::GATEWAY_TIMEOUT);
        server.abort();
    }

    #[tokio::test]
    async fn generate_joins_candidate_text_parts() {
        let (base_url, server) = serve_once(
            "200 OK",
            json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"text": "{\"calories\":\"95\","},
                    {"text": "\"protein\":\"1g\",\"carbs\":\"25g\",\"fat\":\"0g\"}"}
                ]}}]
            })
            .to_string(),
            Duration::ZERO,
        )
        .await;
        let client = client_for(base_url, 5);

        let text = client.generate_content(&request()).await.unwrap();
        assert_eq!(
            text.as_deref(),
            Some(r#"{"calories":"95","protein":"1g","carbs":"25g","fat":"0g"}"#)
        );

        let sent = server.await.unwrap();
        assert!(sent.starts_with(&format!(
            "POST /v1beta/models/{DEFAULT_GEMINI_MODEL}:generateContent HTTP/1.1"
        )));
        assert!(sent.contains(r#""fileUri":"https://files.example/abc""#));
        assert!(sent.contains(r#""responseMimeType":"application/json""#));
    }
}
