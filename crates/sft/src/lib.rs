//! Supervised fine-tuning utilities for instruction data.
//!
//! Renders Alpaca-style records into a question/answer prompt format, packs
//! them into constant-length token sequences, and computes a masked
//! next-token cross entropy with accuracy and perplexity metrics. Tokenizers
//! plug in through the [`scoring::Encode`] seam.

pub mod config;
pub mod data;
pub mod error;
pub mod format;
pub mod loss;

pub use config::SftConfig;
pub use data::{PackedInstructionLoader, SftBatch};
pub use error::{Result, SftError};
pub use format::{chars_token_ratio, prepare_sample_text, InstructionSample};
pub use loss::{MaskedCrossEntropy, SftLossMetrics, SftLossOutput};
