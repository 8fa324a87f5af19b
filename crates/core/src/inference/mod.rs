pub mod sse;
pub mod vertex;

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use serde::Serialize;

use crate::{config::DEFAULT_MAX_RESPONSE_BYTES, storage::VIDEO_MIME_TYPE};

pub use vertex::VertexBackend;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Missing credentials: {env_var} environment variable is not set")]
    MissingCredentials { env_var: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed stream: {0}")]
    Protocol(String),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Text increments in arrival order.
pub type TextStream = BoxStream<'static, Result<String, InferenceError>>;

/// Multimodal generation capability consumed by [`InferenceClient`].
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn stream_generate(&self, request: &AnalysisRequest) -> Result<TextStream, InferenceError>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 8192,
            temperature: 0.0,
            top_p: 0.95,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockThreshold {
    BlockLowAndAbove,
    BlockMediumAndAbove,
    BlockOnlyHigh,
    BlockNone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: BlockThreshold,
}

/// "Block medium and above" for every category.
pub fn default_safety_settings() -> Vec<SafetySetting> {
    [
        HarmCategory::HateSpeech,
        HarmCategory::DangerousContent,
        HarmCategory::SexuallyExplicit,
        HarmCategory::Harassment,
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: BlockThreshold::BlockMediumAndAbove,
    })
    .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestPart {
    Video { mime_type: String, uri: String },
    Text(String),
}

#[derive(Clone, Debug)]
pub struct AnalysisRequest {
    pub model_id: String,
    pub parts: Vec<RequestPart>,
    pub generation_config: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
}

impl AnalysisRequest {
    pub fn new(video_uri: &str, prompt: &str, model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            parts: vec![
                RequestPart::Video {
                    mime_type: VIDEO_MIME_TYPE.to_string(),
                    uri: video_uri.to_string(),
                },
                RequestPart::Text(prompt.to_string()),
            ],
            generation_config: GenerationConfig::default(),
            safety_settings: default_safety_settings(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisStatus {
    Complete,
    Empty,
    Failed { cause: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    pub text: String,
    #[serde(flatten)]
    pub status: AnalysisStatus,
    /// Output hit the accumulation cap and the stream was abandoned.
    pub truncated: bool,
}

impl AnalysisResult {
    pub fn failed(cause: impl ToString) -> Self {
        Self {
            text: String::new(),
            status: AnalysisStatus::Failed {
                cause: cause.to_string(),
            },
            truncated: false,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, AnalysisStatus::Failed { .. })
    }
}

pub struct InferenceClient {
    backend: Arc<dyn InferenceBackend>,
    max_response_bytes: usize,
}

impl InferenceClient {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self::with_limit(backend, DEFAULT_MAX_RESPONSE_BYTES)
    }

    pub fn with_limit(backend: Arc<dyn InferenceBackend>, max_response_bytes: usize) -> Self {
        Self {
            backend,
            max_response_bytes,
        }
    }

    /// Run one streamed generation and fold the increments into a single result.
    ///
    /// Any error while the stream is open discards what was accumulated so far.
    pub async fn analyze(&self, video_uri: &str, prompt: &str, model_id: &str) -> AnalysisResult {
        let request = AnalysisRequest::new(video_uri, prompt, model_id);
        tracing::info!(model = model_id, video = video_uri, "starting streamed analysis");

        let mut stream = match self.backend.stream_generate(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "inference request failed");
                return AnalysisResult::failed(e);
            }
        };

        let mut text = String::new();
        let mut increments = 0usize;
        let mut truncated = false;

        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(error = %e, increments, "inference stream failed");
                    return AnalysisResult::failed(e);
                }
            };
            increments += 1;

            let room = self.max_response_bytes.saturating_sub(text.len());
            if chunk.len() > room {
                let mut cut = room;
                while !chunk.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.push_str(&chunk[..cut]);
                truncated = true;
                tracing::warn!(
                    limit = self.max_response_bytes,
                    increments,
                    "response exceeded cap, stream abandoned"
                );
                break;
            }

            text.push_str(&chunk);
            tracing::debug!(increments, bytes = text.len(), "received increment");
        }

        let status = if text.is_empty() {
            AnalysisStatus::Empty
        } else {
            AnalysisStatus::Complete
        };
        tracing::info!(increments, bytes = text.len(), ?status, truncated, "analysis finished");

        AnalysisResult {
            text,
            status,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;

    use super::*;

    struct ScriptedBackend {
        increments: Mutex<Option<Vec<Result<String, InferenceError>>>>,
        seen: Mutex<Option<AnalysisRequest>>,
    }

    impl ScriptedBackend {
        fn new(increments: Vec<Result<String, InferenceError>>) -> Arc<Self> {
            Arc::new(Self {
                increments: Mutex::new(Some(increments)),
                seen: Mutex::new(None),
            })
        }

        fn ok(chunks: &[&str]) -> Arc<Self> {
            Self::new(chunks.iter().map(|c| Ok(c.to_string())).collect())
        }
    }

    #[async_trait]
    impl InferenceBackend for ScriptedBackend {
        async fn stream_generate(
            &self,
            request: &AnalysisRequest,
        ) -> Result<TextStream, InferenceError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            let items = self.increments.lock().unwrap().take().unwrap_or_default();
            Ok(stream::iter(items).boxed())
        }
    }

    struct RejectingBackend;

    #[async_trait]
    impl InferenceBackend for RejectingBackend {
        async fn stream_generate(&self, _: &AnalysisRequest) -> Result<TextStream, InferenceError> {
            Err(InferenceError::Status {
                status: 403,
                body: "permission denied".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn increments_are_joined_in_arrival_order() {
        let client = InferenceClient::new(ScriptedBackend::ok(&["A", "B", "C"]));
        let result = client.analyze("gs://b/v.mp4", "prompt", "model").await;
        assert_eq!(result.text, "ABC");
        assert_eq!(result.status, AnalysisStatus::Complete);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn repeated_increments_are_kept() {
        let client = InferenceClient::new(ScriptedBackend::ok(&["ha", "ha", "ha"]));
        let result = client.analyze("gs://b/v.mp4", "prompt", "model").await;
        assert_eq!(result.text, "hahaha");
    }

    #[tokio::test]
    async fn zero_increments_is_empty_not_failed() {
        let client = InferenceClient::new(ScriptedBackend::ok(&[]));
        let result = client.analyze("gs://b/v.mp4", "prompt", "model").await;
        assert_eq!(result.text, "");
        assert_eq!(result.status, AnalysisStatus::Empty);
        assert!(!result.is_failed());
    }

    #[tokio::test]
    async fn mid_stream_error_discards_partial_text() {
        let backend = ScriptedBackend::new(vec![
            Ok("Attempt 1".to_string()),
            Err(InferenceError::Protocol("connection reset".to_string())),
            Ok("never seen".to_string()),
        ]);
        let client = InferenceClient::new(backend);
        let result = client.analyze("gs://b/v.mp4", "prompt", "model").await;
        assert_eq!(result.text, "");
        assert!(
            matches!(result.status, AnalysisStatus::Failed { ref cause } if cause.contains("connection reset"))
        );
    }

    #[tokio::test]
    async fn rejected_request_is_failed() {
        let client = InferenceClient::new(Arc::new(RejectingBackend));
        let result = client.analyze("gs://b/v.mp4", "prompt", "model").await;
        assert!(result.is_failed());
    }

    #[tokio::test]
    async fn output_past_cap_is_truncated() {
        let client = InferenceClient::with_limit(ScriptedBackend::ok(&["abcd", "efgh", "ijkl"]), 6);
        let result = client.analyze("gs://b/v.mp4", "prompt", "model").await;
        assert_eq!(result.text, "abcdef");
        assert!(result.truncated);
        assert_eq!(result.status, AnalysisStatus::Complete);
    }

    #[tokio::test]
    async fn truncation_respects_char_boundaries() {
        let client = InferenceClient::with_limit(ScriptedBackend::ok(&["aé"]), 2);
        let result = client.analyze("gs://b/v.mp4", "prompt", "model").await;
        assert_eq!(result.text, "a");
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn output_exactly_at_cap_is_not_truncated() {
        let client = InferenceClient::with_limit(ScriptedBackend::ok(&["abc", "def"]), 6);
        let result = client.analyze("gs://b/v.mp4", "prompt", "model").await;
        assert_eq!(result.text, "abcdef");
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn request_pairs_video_with_prompt_under_fixed_policy() {
        let backend = ScriptedBackend::ok(&["x"]);
        let client = InferenceClient::new(backend.clone());
        client
            .analyze("gs://bucket/flight1.mp4", "List refueling attempts", "gemini-pro")
            .await;

        let request = backend.seen.lock().unwrap().clone().unwrap();
        assert_eq!(request.model_id, "gemini-pro");
        assert_eq!(
            request.parts,
            vec![
                RequestPart::Video {
                    mime_type: "video/mp4".to_string(),
                    uri: "gs://bucket/flight1.mp4".to_string(),
                },
                RequestPart::Text("List refueling attempts".to_string()),
            ]
        );
        assert_eq!(request.generation_config.max_output_tokens, 8192);
        assert_eq!(request.generation_config.temperature, 0.0);
        assert_eq!(request.generation_config.top_p, 0.95);
        assert_eq!(request.safety_settings.len(), 4);
        assert!(
            request
                .safety_settings
                .iter()
                .all(|s| s.threshold == BlockThreshold::BlockMediumAndAbove)
        );
    }

    #[test]
    fn result_serializes_with_flat_status() {
        let result = AnalysisResult::failed("boom");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["cause"], "boom");
        assert_eq!(json["text"], "");
    }
}
