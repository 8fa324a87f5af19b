//! Orchestration controller: one user session driving upload, selection,
//! preview and analysis as strictly sequential steps.

use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{Result, VqaError},
    inference::{AnalysisResult, AnalysisStatus, InferenceClient},
    models::{ModelResolver, ModelTier},
    storage::{SignedUrl, StorageGateway},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Uploading,
    VideoReady,
    Analyzing,
    Complete,
    Failed,
}

pub struct Controller {
    gateway: StorageGateway,
    resolver: ModelResolver,
    inference: InferenceClient,

    session_id: Uuid,
    phase: Phase,
    selected: Option<String>,
    videos: Vec<String>,
    last_result: Option<AnalysisResult>,
    last_error: Option<String>,
}

impl Controller {
    pub fn new(gateway: StorageGateway, resolver: ModelResolver, inference: InferenceClient) -> Self {
        Self {
            gateway,
            resolver,
            inference,
            session_id: Uuid::new_v4(),
            phase: Phase::Idle,
            selected: None,
            videos: Vec::new(),
            last_result: None,
            last_error: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Names from the last successful listing.
    pub fn videos(&self) -> &[String] {
        &self.videos
    }

    pub fn last_result(&self) -> Option<&AnalysisResult> {
        self.last_result.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn namespace(&self) -> &str {
        self.gateway.namespace()
    }

    #[tracing::instrument(skip(self), fields(session = %self.session_id))]
    pub async fn list_videos(&mut self) -> Result<Vec<String>> {
        match self.gateway.list_videos().await {
            Ok(videos) => {
                self.videos = videos.clone();
                Ok(videos)
            }
            Err(e) => Err(self.record(e)),
        }
    }

    #[tracing::instrument(skip(self, bytes), fields(session = %self.session_id, size = bytes.len()))]
    pub async fn upload_video(&mut self, bytes: Vec<u8>, original_name: &str) -> Result<String> {
        let previous = self.phase;
        self.transition(Phase::Uploading);

        let stored = match self.gateway.upload_video(bytes, original_name).await {
            Ok(stored) => stored,
            Err(e) => {
                self.phase = previous;
                return Err(self.record(e));
            }
        };

        match self.gateway.list_videos().await {
            Ok(videos) => self.videos = videos,
            Err(e) => {
                tracing::warn!(error = %e, "list refresh after upload failed");
                if !self.videos.contains(&stored) {
                    self.videos.push(stored.clone());
                }
            }
        }

        self.choose(&stored);
        Ok(stored)
    }

    /// Select a stored video and return a playback URL for it.
    #[tracing::instrument(skip(self), fields(session = %self.session_id))]
    pub async fn select_video(&mut self, name: &str) -> Result<SignedUrl> {
        let url = self.preview_url(name).await?;
        self.choose(name);
        Ok(url)
    }

    #[tracing::instrument(skip(self), fields(session = %self.session_id))]
    pub async fn preview_url(&mut self, name: &str) -> Result<SignedUrl> {
        self.gateway
            .signed_read_url(name)
            .await
            .map_err(|e| self.record(e))
    }

    #[tracing::instrument(skip(self), fields(session = %self.session_id))]
    pub async fn fetch_video(&mut self, name: &str) -> Result<Vec<u8>> {
        self.gateway.fetch_video(name).await.map_err(|e| self.record(e))
    }

    /// Analyze `name` with the model behind `tier`. One attempt, no retries.
    #[tracing::instrument(skip(self, prompt), fields(session = %self.session_id))]
    pub async fn run_analysis(
        &mut self,
        name: &str,
        tier: ModelTier,
        prompt: &str,
    ) -> Result<AnalysisResult> {
        if prompt.trim().is_empty() {
            return Err(self.record(VqaError::EmptyPrompt));
        }
        if self.selected.as_deref() != Some(name) {
            if let Err(e) = self.gateway.ensure_video(name).await {
                return Err(self.record(e));
            }
            self.choose(name);
        }

        self.transition(Phase::Analyzing);
        self.last_result = None;

        let model_id = self.resolver.resolve(tier);
        let video_uri = self.gateway.storage_uri(name);
        let result = self.inference.analyze(&video_uri, prompt, model_id).await;

        if let AnalysisStatus::Failed { cause } = &result.status {
            let err = VqaError::InferenceFailed {
                cause: cause.clone(),
            };
            self.transition(Phase::Failed);
            return Err(self.record(err));
        }

        self.transition(Phase::Complete);
        self.last_error = None;
        self.last_result = Some(result.clone());
        Ok(result)
    }

    pub async fn run_selected(&mut self, tier: ModelTier, prompt: &str) -> Result<AnalysisResult> {
        let Some(name) = self.selected.clone() else {
            return Err(self.record(VqaError::NoVideoSelected));
        };
        self.run_analysis(&name, tier, prompt).await
    }

    fn choose(&mut self, name: &str) {
        self.selected = Some(name.to_string());
        self.last_result = None;
        self.last_error = None;
        self.transition(Phase::VideoReady);
    }

    fn transition(&mut self, next: Phase) {
        if self.phase != next {
            tracing::info!(from = ?self.phase, to = ?next, "session transition");
            self.phase = next;
        }
    }

    fn record(&mut self, err: VqaError) -> VqaError {
        tracing::warn!(error = %err, "action failed");
        self.last_error = Some(err.to_string());
        err
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use futures::{StreamExt, stream};

    use super::*;
    use crate::{
        clock::FixedClock,
        inference::{AnalysisRequest, InferenceBackend, InferenceError, TextStream},
        storage::MemoryObjectStore,
    };

    struct EchoModel;

    #[async_trait]
    impl InferenceBackend for EchoModel {
        async fn stream_generate(&self, request: &AnalysisRequest) -> std::result::Result<TextStream, InferenceError> {
            let model = request.model_id.clone();
            Ok(stream::iter(vec![Ok(model)]).boxed())
        }
    }

    struct BrokenModel;

    #[async_trait]
    impl InferenceBackend for BrokenModel {
        async fn stream_generate(&self, _: &AnalysisRequest) -> std::result::Result<TextStream, InferenceError> {
            Ok(stream::iter(vec![
                Ok("partial".to_string()),
                Err(InferenceError::Protocol("stream reset".to_string())),
            ])
            .boxed())
        }
    }

    fn controller(store: Arc<MemoryObjectStore>, backend: Arc<dyn InferenceBackend>) -> Controller {
        let gateway = StorageGateway::with_clock(
            store,
            "bucket",
            Arc::new(FixedClock::at_unix(1_700_000_000)),
        );
        Controller::new(
            gateway,
            ModelResolver::new("light-model", "pro-model").unwrap(),
            InferenceClient::new(backend),
        )
    }

    fn seeded() -> Arc<MemoryObjectStore> {
        Arc::new(MemoryObjectStore::with_objects(
            "bucket",
            [("flight1.mp4", b"v".to_vec()), ("notes.txt", b"n".to_vec())],
        ))
    }

    #[tokio::test]
    async fn starts_idle() {
        let c = controller(seeded(), Arc::new(EchoModel));
        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(c.selected(), None);
    }

    #[tokio::test]
    async fn tier_selects_model() {
        let mut c = controller(seeded(), Arc::new(EchoModel));
        let light = c.run_analysis("flight1.mp4", ModelTier::Light, "p").await.unwrap();
        assert_eq!(light.text, "light-model");
        let pro = c.run_analysis("flight1.mp4", ModelTier::Pro, "p").await.unwrap();
        assert_eq!(pro.text, "pro-model");
        assert_eq!(c.phase(), Phase::Complete);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_any_call() {
        let mut c = controller(seeded(), Arc::new(EchoModel));
        c.select_video("flight1.mp4").await.unwrap();
        let err = c.run_analysis("flight1.mp4", ModelTier::Pro, "   ").await.unwrap_err();
        assert!(matches!(err, VqaError::EmptyPrompt));
        assert_eq!(c.phase(), Phase::VideoReady);
    }

    #[tokio::test]
    async fn failed_run_keeps_selection_and_can_rerun() {
        let mut c = controller(seeded(), Arc::new(BrokenModel));
        c.select_video("flight1.mp4").await.unwrap();

        let err = c.run_selected(ModelTier::Pro, "p").await.unwrap_err();
        assert!(matches!(err, VqaError::InferenceFailed { ref cause } if cause.contains("stream reset")));
        assert_eq!(c.phase(), Phase::Failed);
        assert_eq!(c.selected(), Some("flight1.mp4"));
        assert!(c.last_result().is_none());
        assert!(c.last_error().unwrap().contains("stream reset"));

        let again = c.run_selected(ModelTier::Pro, "p").await;
        assert!(again.is_err());
        assert_eq!(c.selected(), Some("flight1.mp4"));
    }

    #[tokio::test]
    async fn run_without_selection_is_rejected() {
        let mut c = controller(seeded(), Arc::new(EchoModel));
        let err = c.run_selected(ModelTier::Light, "p").await.unwrap_err();
        assert!(matches!(err, VqaError::NoVideoSelected));
    }

    #[tokio::test]
    async fn stale_selection_surfaces_not_found_and_keeps_state() {
        let mut c = controller(seeded(), Arc::new(EchoModel));
        c.list_videos().await.unwrap();
        c.select_video("flight1.mp4").await.unwrap();

        let err = c.select_video("deleted.mp4").await.unwrap_err();
        assert!(matches!(err, VqaError::ObjectNotFound { .. }));
        assert_eq!(c.selected(), Some("flight1.mp4"));
        assert_eq!(c.videos(), ["flight1.mp4".to_string()]);
    }

    #[tokio::test]
    async fn failed_upload_rolls_back_phase() {
        let store = seeded();
        store.fail_next_put("quota exceeded");
        let mut c = controller(store, Arc::new(EchoModel));
        c.list_videos().await.unwrap();
        c.select_video("flight1.mp4").await.unwrap();

        let err = c.upload_video(b"x".to_vec(), "clip.mp4").await.unwrap_err();
        assert!(matches!(err, VqaError::UploadFailed { .. }));
        assert_eq!(c.phase(), Phase::VideoReady);
        assert_eq!(c.selected(), Some("flight1.mp4"));
        assert_eq!(c.videos(), ["flight1.mp4".to_string()]);
    }

    #[tokio::test]
    async fn upload_selects_the_stored_video() {
        let mut c = controller(seeded(), Arc::new(EchoModel));
        let stored = c.upload_video(b"x".to_vec(), "clip.mp4").await.unwrap();
        assert_eq!(stored, "1700000000_clip.mp4");
        assert_eq!(c.phase(), Phase::VideoReady);
        assert_eq!(c.selected(), Some(stored.as_str()));
        assert!(c.videos().contains(&stored));
    }

    struct NotFoundModel;

    #[async_trait]
    impl InferenceBackend for NotFoundModel {
        async fn stream_generate(&self, _: &AnalysisRequest) -> std::result::Result<TextStream, InferenceError> {
            Err(InferenceError::Status {
                status: 404,
                body: "no such file".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn unknown_name_keeps_previous_selection() {
        let mut c = controller(seeded(), Arc::new(NotFoundModel));
        c.select_video("flight1.mp4").await.unwrap();

        let err = c.run_analysis("typo.mp4", ModelTier::Pro, "q").await.unwrap_err();
        assert!(matches!(err, VqaError::ObjectNotFound { ref name } if name == "typo.mp4"));
        assert_eq!(c.selected(), Some("flight1.mp4"));
        assert_eq!(c.phase(), Phase::VideoReady);
    }

    #[tokio::test]
    async fn non_video_object_is_never_sent_to_the_model() {
        let mut c = controller(seeded(), Arc::new(EchoModel));
        c.select_video("flight1.mp4").await.unwrap();

        let err = c.run_analysis("notes.txt", ModelTier::Light, "q").await.unwrap_err();
        assert!(matches!(err, VqaError::ObjectNotFound { .. }));
        assert_eq!(c.selected(), Some("flight1.mp4"));
        assert!(c.last_result().is_none());
    }

    #[tokio::test]
    async fn failed_listing_keeps_previous_listing() {
        let store = seeded();
        let mut c = controller(store.clone(), Arc::new(EchoModel));
        c.list_videos().await.unwrap();
        c.select_video("flight1.mp4").await.unwrap();

        store.remove_namespace("bucket");
        let err = c.list_videos().await.unwrap_err();
        assert!(matches!(err, VqaError::StorageUnavailable { .. }));
        assert_eq!(c.videos(), ["flight1.mp4".to_string()]);
        assert_eq!(c.selected(), Some("flight1.mp4"));
        assert_eq!(c.phase(), Phase::VideoReady);
    }

    #[tokio::test]
    async fn missing_bucket_is_surfaced_without_clearing_listing() {
        let mut c = controller(Arc::new(MemoryObjectStore::new()), Arc::new(EchoModel));
        let err = c.list_videos().await.unwrap_err();
        assert!(matches!(err, VqaError::StorageUnavailable { .. }));
        assert!(c.last_error().is_some());
        assert!(c.videos().is_empty());
    }
}
