use thiserror::Error;

pub type Result<T> = std::result::Result<T, SftError>;

#[derive(Error, Debug)]
pub enum SftError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("failed to parse config: {0}")]
    ConfigFormat(String),
}

impl SftError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn tokenization(message: impl Into<String>) -> Self {
        Self::Tokenization(message.into())
    }
}

impl From<scoring::ScoringError> for SftError {
    fn from(err: scoring::ScoringError) -> Self {
        match err {
            scoring::ScoringError::Tokenization(message) => Self::Tokenization(message),
            other => Self::Input(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for SftError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigFormat(err.to_string())
    }
}

impl From<serde_json::Error> for SftError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigFormat(err.to_string())
    }
}
