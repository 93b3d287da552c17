use std::{fs, path::Path};

use serde::Deserialize;

use crate::error::{Result, SftError};

#[derive(Debug, Clone, Deserialize)]
pub struct SftConfig {
    #[serde(default = "default_seq_length")]
    pub seq_length: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_packing")]
    pub packing: bool,
    /// How many samples to inspect when estimating the characters-per-token
    /// ratio of a dataset.
    #[serde(default = "default_ratio_estimate_examples")]
    pub ratio_estimate_examples: usize,
}

impl Default for SftConfig {
    fn default() -> Self {
        Self {
            seq_length: default_seq_length(),
            batch_size: default_batch_size(),
            seed: default_seed(),
            packing: default_packing(),
            ratio_estimate_examples: default_ratio_estimate_examples(),
        }
    }
}

impl SftConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: SftConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(SftError::ConfigFormat(format!(
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

        if self.seq_length == 0 {
            errors.push("seq_length must be greater than 0".to_string());
        }

        if self.batch_size == 0 {
            errors.push("batch_size must be greater than 0".to_string());
        }

        if self.ratio_estimate_examples == 0 {
            errors.push("ratio_estimate_examples must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(SftError::Config(errors.join("; ")));
        }

        Ok(())
    }
}

fn default_seq_length() -> usize {
    1024
}

fn default_batch_size() -> usize {
    4
}

fn default_seed() -> u64 {
    42
}

fn default_packing() -> bool {
    true
}

fn default_ratio_estimate_examples() -> usize {
    400
}
