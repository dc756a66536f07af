use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MinikubeError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("No asset found for {os} and {arch}")]
    AssetNotFound { os: String, arch: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("process error: {message}")]
    Process {
        message: String,
        details: ProcessErrorDetails,
    },
    #[error("Execution cancelled")]
    Cancelled,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to remove temporary file {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        source: io::Error,
        primary: Option<Box<MinikubeError>>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessErrorDetails {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_stderr: Option<String>,
}

impl MinikubeError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            MinikubeError::Cancelled => true,
            MinikubeError::Cleanup {
                primary: Some(primary),
                ..
            } => primary.is_cancelled(),
            _ => false,
        }
    }

    pub fn process_details(&self) -> Option<&ProcessErrorDetails> {
        match self {
            MinikubeError::Process { details, .. } => Some(details),
            MinikubeError::Cleanup {
                primary: Some(primary),
                ..
            } => primary.process_details(),
            _ => None,
        }
    }

    pub fn primary(&self) -> Option<&MinikubeError> {
        match self {
            MinikubeError::Cleanup { primary, .. } => primary.as_deref(),
            _ => None,
        }
    }
}
