use thiserror::Error;

use crate::{config::ConfigError, storage::StorageError};

/// Failures surfaced to the user at the controller boundary.
///
/// The `Display` output of every variant is the message shown to the user.
#[derive(Error, Debug)]
pub enum VqaError {
    #[error("Storage bucket {namespace} is unavailable")]
    StorageUnavailable { namespace: String },

    #[error("Video {name} no longer exists, please select another one")]
    ObjectNotFound { name: String },

    #[error("Upload failed: {cause}")]
    UploadFailed { cause: String },

    #[error("Analysis failed: {cause}")]
    InferenceFailed { cause: String },

    #[error("Prompt must not be empty")]
    EmptyPrompt,

    #[error("No video selected")]
    NoVideoSelected,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, VqaError>;
