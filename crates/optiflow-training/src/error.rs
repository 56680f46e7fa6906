use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training config: {0}")]
    InvalidConfig(String),

    #[error("invalid custom_hooks: {0}")]
    InvalidCustomHooks(String),

    #[error("no hook factory registered for type `{0}`")]
    UnknownHook(String),

    #[error("invalid hook priority: {0}")]
    InvalidPriority(String),

    #[error("hook error: {0}")]
    Hook(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
