use std::path::PathBuf;

use crate::models::{DEFAULT_LIGHT_MODEL, DEFAULT_PRO_MODEL, ModelResolver};

pub const DEFAULT_BUCKET: &str = "air-refueling-video-analysis-bucket";
pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:8080/media";
pub const DEFAULT_LOCAL_SIGNING_KEY: &str = "vqa-local-dev";
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 256 * 1024;
pub const ACCESS_TOKEN_ENV: &str = "VERTEX_ACCESS_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} environment variable is not set")]
    Missing { key: String },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Gcs,
    Local {
        root: PathBuf,
        base_url: String,
        signing_key: String,
    },
}

#[derive(Clone, Debug)]
pub struct InferenceSettings {
    pub project: Option<String>,
    pub location: String,
    pub max_response_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub namespace: String,
    pub storage: StorageBackend,
    pub inference: InferenceSettings,
    pub light_model: String,
    pub pro_model: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage = match get("VQA_STORAGE").as_deref() {
            None | Some("gcs") => StorageBackend::Gcs,
            Some("local") => StorageBackend::Local {
                root: get("VQA_LOCAL_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_local_root),
                base_url: get("VQA_LOCAL_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_LOCAL_BASE_URL.to_string()),
                signing_key: get("VQA_LOCAL_SIGNING_KEY")
                    .unwrap_or_else(|| DEFAULT_LOCAL_SIGNING_KEY.to_string()),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "VQA_STORAGE".to_string(),
                    reason: format!("expected \"gcs\" or \"local\", got \"{other}\""),
                });
            }
        };

        let max_response_bytes = match get("VQA_MAX_RESPONSE_BYTES") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    key: "VQA_MAX_RESPONSE_BYTES".to_string(),
                    reason: format!("expected a positive integer, got \"{raw}\""),
                })?,
            None => DEFAULT_MAX_RESPONSE_BYTES,
        };

        Ok(Self {
            namespace: get("VQA_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            storage,
            inference: InferenceSettings {
                project: get("VERTEX_PROJECT"),
                location: get("VERTEX_LOCATION").unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
                max_response_bytes,
            },
            light_model: get("VQA_MODEL_LIGHT").unwrap_or_else(|| DEFAULT_LIGHT_MODEL.to_string()),
            pro_model: get("VQA_MODEL_PRO").unwrap_or_else(|| DEFAULT_PRO_MODEL.to_string()),
        })
    }

    pub fn model_resolver(&self) -> Result<ModelResolver, ConfigError> {
        ModelResolver::new(&self.light_model, &self.pro_model)
    }

    pub fn require_project(&self) -> Result<&str, ConfigError> {
        self.inference
            .project
            .as_deref()
            .ok_or_else(|| ConfigError::Missing {
                key: "VERTEX_PROJECT".to_string(),
            })
    }
}

pub fn default_local_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vqa")
        .join("storage")
}
