use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::{
    config::ACCESS_TOKEN_ENV,
    inference::{
        AnalysisRequest, GenerationConfig, InferenceBackend, InferenceError, RequestPart,
        SafetySetting, TextStream, sse::SseDecoder,
    },
};

/// Vertex AI `streamGenerateContent` over server-sent events.
pub struct VertexBackend {
    http: reqwest::Client,
    base_url: String,
    project: String,
    location: String,
    access_token: Option<String>,
}

impl VertexBackend {
    /// A missing token only fails once a request is attempted.
    pub fn new(project: &str, location: &str, access_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("https://{location}-aiplatform.googleapis.com"),
            project: project.to_string(),
            location: location.to_string(),
            access_token,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self, model_id: &str) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.project, self.location, model_id
        )
    }
}

/// Read the bearer token for Vertex AI from the environment.
pub fn access_token_from_env() -> Result<String, InferenceError> {
    std::env::var(ACCESS_TOKEN_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| InferenceError::MissingCredentials {
            env_var: ACCESS_TOKEN_ENV.to_string(),
        })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: &'a GenerationConfig,
    safety_settings: &'a [SafetySetting],
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart<'a> {
    File {
        #[serde(rename = "fileData")]
        file_data: FileData<'a>,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

impl<'a> GenerateContentRequest<'a> {
    fn from_request(request: &'a AnalysisRequest) -> Self {
        let parts = request
            .parts
            .iter()
            .map(|part| match part {
                RequestPart::Video { mime_type, uri } => WirePart::File {
                    file_data: FileData {
                        mime_type,
                        file_uri: uri,
                    },
                },
                RequestPart::Text(text) => WirePart::Text { text },
            })
            .collect();

        Self {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: &request.generation_config,
            safety_settings: &request.safety_settings,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ChunkContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChunkContent {
    #[serde(default)]
    parts: Vec<ChunkPart>,
}

#[derive(Deserialize)]
struct ChunkPart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

/// Text carried by one streamed event, if any.
fn parse_chunk(payload: &str) -> Result<Option<String>, InferenceError> {
    let chunk: StreamChunk = serde_json::from_str(payload)?;

    if let Some(err) = chunk.error {
        return Err(InferenceError::Protocol(format!(
            "backend error {}: {}",
            err.code.unwrap_or_default(),
            err.message
        )));
    }
    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        tracing::warn!(%reason, "prompt blocked by safety policy");
    }

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(None);
    };
    if let Some(reason) = candidate.finish_reason.as_deref() {
        if reason == "SAFETY" {
            tracing::warn!("candidate withheld by safety thresholds");
        } else {
            tracing::debug!(%reason, "candidate finished");
        }
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}

/// Decode a raw event-stream body into text increments.
pub fn sse_text_stream<S, B, E>(body: S) -> impl Stream<Item = Result<String, InferenceError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<InferenceError>,
{
    async_stream::try_stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for payload in decoder.push(chunk.as_ref())? {
                if let Some(text) = parse_chunk(&payload)? {
                    yield text;
                }
            }
        }

        if let Some(payload) = decoder.finish() {
            if let Some(text) = parse_chunk(&payload)? {
                yield text;
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for VertexBackend {
    async fn stream_generate(&self, request: &AnalysisRequest) -> Result<TextStream, InferenceError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| InferenceError::MissingCredentials {
                env_var: ACCESS_TOKEN_ENV.to_string(),
            })?;
        let body = GenerateContentRequest::from_request(request);

        let response = self
            .http
            .post(self.endpoint(&request.model_id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(sse_text_stream(response.bytes_stream()).boxed())
    }
}
