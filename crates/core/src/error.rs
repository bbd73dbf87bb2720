use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeraldError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unclosed env var reference in: {0}")]
    UnclosedEnvVar(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HeraldError>;
