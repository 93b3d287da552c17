//! Reference-free DPO scoring for preference post-training.
//!
//! The pipeline turns `(prompt, chosen, rejected)` triples into comparable
//! preference scores without training a reward-model head: rows are
//! tokenized and truncated under a shared length budget ([`row`]), the chosen
//! and rejected variants are stacked along the batch dimension so one forward
//! pass scores both ([`batch`]), per-sequence log-likelihoods are reduced
//! over the unmasked label positions ([`logprob`]), and the scorer either
//! contrasts a policy model against a reference model or normalizes the
//! policy's own log-probabilities ([`inference`]). The dataset driver in
//! [`feedback`] batches a whole dataset through the scorer and converts raw
//! score pairs into probabilities with a two-way softmax.
//!
//! Judge-text utilities live in [`parse`] (fail-soft `<Chosen>` /
//! `<Explanation>` tag extraction) and [`metric`] (preference accuracy over
//! a labeled set).
//!
//! Models and tokenizers enter through narrow seams: [`ScoringModel`] for the
//! forward pass and [`Encode`] for raw-text encoding, so the core is testable
//! with mocks and agnostic to how weights are loaded.

pub mod batch;
pub mod config;
pub mod error;
pub mod feedback;
pub mod inference;
pub mod logprob;
pub mod metric;
pub mod parse;
pub mod row;
pub mod seed;

pub use batch::{collate, concatenated_inputs, pad_to_length, ConcatenatedBatch, PaddedBatch};
pub use config::{
    RefFreeNorm, ScorerConfig, SpecialTokens, TruncationSide, LABEL_PAD_TOKEN_ID,
};
pub use error::{Result, ScoringError};
pub use feedback::{
    compute_feedback, compute_feedback_dual, softmax_pair, DualFeedback, ScoreRecord,
};
pub use inference::{DpoScorer, ScoringModel};
pub use logprob::{batch_log_probs, LogProbReduction};
pub use metric::{preference_accuracy, MetricReport, PredictedInstance};
pub use parse::{parse_explanation, parse_preference, Parsed, Preference};
pub use row::{Encode, PreferenceExample, RowTokenizer, TokenizedAnswer, TokenizedRow};
pub use seed::seed_everything;
