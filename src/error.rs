use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    /// Malformed or schema-mismatched input.
    #[error("data error: {0}")]
    Data(String),
    /// Invalid training data labels or configuration values.
    #[error("config error: {0}")]
    Config(String),
    /// Artifact incompatible with the running code.
    #[error("model load error: {0}")]
    ModelLoad(String),
    #[error("reasoning error: {0}")]
    Reasoning(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ActionError {
    /// Prefixes data errors with the clip they came from.
    pub fn in_clip(self, clip_id: &str) -> Self {
        match self {
            ActionError::Data(msg) => ActionError::Data(format!("clip '{clip_id}': {msg}")),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ActionError>;
