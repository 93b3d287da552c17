use std::{fs, path::Path};

use serde::Deserialize;
use tokenizers::Tokenizer;

use crate::error::{Result, ScoringError};

/// Sentinel label value marking positions excluded from log-probability
/// computation (prompt tokens and label padding).
pub const LABEL_PAD_TOKEN_ID: i64 = -100;

/// Which end of an over-long prompt survives truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationSide {
    KeepStart,
    KeepEnd,
}

impl Default for TruncationSide {
    fn default() -> Self {
        TruncationSide::KeepEnd
    }
}

/// Normalization applied to policy log-likelihoods when scoring without a
/// reference model. `None` is forced whenever a reference model is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefFreeNorm {
    None,
    /// Negative L2 norm of the per-token log-probabilities. Not a
    /// log-probability; kept exactly as formulated in the research code.
    Norm,
    Avg,
    Sum,
}

impl Default for RefFreeNorm {
    fn default() -> Self {
        RefFreeNorm::Norm
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScorerConfig {
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,
    #[serde(default)]
    pub truncation_side: TruncationSide,
    #[serde(default)]
    pub ref_free_norm: RefFreeNorm,
    #[serde(default = "default_label_pad_token_id")]
    pub label_pad_token_id: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            max_prompt_length: default_max_prompt_length(),
            truncation_side: TruncationSide::default(),
            ref_free_norm: RefFreeNorm::default(),
            label_pad_token_id: default_label_pad_token_id(),
            batch_size: default_batch_size(),
        }
    }
}

impl ScorerConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: ScorerConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(ScoringError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.max_length == 0 {
            errors.push("max_length must be greater than 0".to_string());
        }

        if self.max_prompt_length == 0 {
            errors.push("max_prompt_length must be greater than 0".to_string());
        }

        if self.max_prompt_length >= self.max_length {
            errors.push(format!(
                "max_prompt_length ({}) must be smaller than max_length ({})",
                self.max_prompt_length, self.max_length
            ));
        }

        if self.label_pad_token_id >= 0 {
            errors.push(format!(
                "label_pad_token_id ({}) must be negative so it cannot collide with a vocabulary id",
                self.label_pad_token_id
            ));
        }

        if self.batch_size == 0 {
            errors.push("batch_size must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(ScoringError::Config(errors.join("; ")));
        }

        Ok(())
    }
}

/// Special-token ids the row tokenizer needs. The `tokenizers` crate does not
/// carry a BOS accessor, so ids are resolved explicitly up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub bos_id: u32,
    pub eos_id: u32,
    pub pad_id: u32,
}

impl SpecialTokens {
    pub fn new(bos_id: u32, eos_id: u32, pad_id: u32) -> Self {
        Self {
            bos_id,
            eos_id,
            pad_id,
        }
    }

    /// Resolves ids from token strings. A missing BOS token falls back to the
    /// EOS id for both BOS and padding, matching how Qwen-family tokenizers
    /// are handled upstream.
    pub fn resolve(tokenizer: &Tokenizer, bos_token: &str, eos_token: &str) -> Result<Self> {
        let eos_id = tokenizer.token_to_id(eos_token).ok_or_else(|| {
            ScoringError::config(format!("tokenizer has no id for eos token '{}'", eos_token))
        })?;

        match tokenizer.token_to_id(bos_token) {
            Some(bos_id) => {
                let pad_id = tokenizer
                    .get_padding()
                    .map(|params| params.pad_id)
                    .unwrap_or(eos_id);
                Ok(Self::new(bos_id, eos_id, pad_id))
            }
            None => Ok(Self::new(eos_id, eos_id, eos_id)),
        }
    }
}

fn default_max_length() -> usize {
    2048
}

fn default_max_prompt_length() -> usize {
    128
}

fn default_label_pad_token_id() -> i64 {
    LABEL_PAD_TOKEN_ID
}

fn default_batch_size() -> usize {
    4
}
