use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoringError>;

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("failed to parse config: {0}")]
    ConfigFormat(String),
}

impl ScoringError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<toml::de::Error> for ScoringError {
    fn from(value: toml::de::Error) -> Self {
        ScoringError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for ScoringError {
    fn from(value: serde_json::Error) -> Self {
        ScoringError::ConfigFormat(value.to_string())
    }
}
