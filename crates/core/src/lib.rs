//! vqa core library
//!
//! Resolves stored videos to fetchable URIs, submits them with a prompt to a
//! multimodal model under a fixed safety policy and folds the streamed answer
//! into one report.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod format;
pub mod inference;
pub mod models;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AppConfig, ConfigError, StorageBackend};
pub use controller::{Controller, Phase};
pub use error::{Result, VqaError};
pub use format::{format_analysis_readable, format_duration};
pub use inference::{
    AnalysisRequest, AnalysisResult, AnalysisStatus, InferenceBackend, InferenceClient,
    InferenceError, TextStream, VertexBackend,
};
pub use models::{ModelResolver, ModelTier};
pub use storage::{
    GcsObjectStore, LocalObjectStore, MemoryObjectStore, ObjectStore, SignedUrl, StorageError,
    StorageGateway, VideoAsset,
};
