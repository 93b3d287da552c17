use std::sync::Arc;

use candle_core::{DType, Device, Tensor};

use crate::batch::{collate, concatenated_inputs, PaddedBatch};
use crate::config::RefFreeNorm;
use crate::error::{Result, ScoringError};
use crate::logprob::{batch_log_probs, LogProbReduction};
use crate::row::{Encode, PreferenceExample, RowTokenizer, TokenizedRow};

/// The model surface driven by the scorer: one forward pass from token ids to
/// logits shaped `(batch, seq, vocab)`. Implementations are read concurrently
/// and never mutated, so parallel policy/reference passes are safe.
pub trait ScoringModel: Send + Sync {
    fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        decoder_input_ids: Option<&Tensor>,
        labels: Option<&Tensor>,
    ) -> candle_core::Result<Tensor>;

    fn is_encoder_decoder(&self) -> bool {
        false
    }
}

/// Reference-free DPO scoring engine. Holds a policy model, an optional
/// reference model, the row tokenizer, and the normalization mode; none of it
/// mutates after construction, so a scorer can be shared freely.
///
/// This is an inference-only path: scores come out as host-side `f32`s and no
/// gradient state is ever involved.
pub struct DpoScorer<E: Encode> {
    policy: Arc<dyn ScoringModel>,
    reference: Option<Arc<dyn ScoringModel>>,
    tokenizer: RowTokenizer<E>,
    ref_free_norm: RefFreeNorm,
    label_pad_token_id: i64,
    padding_value: i64,
    device: Device,
}

impl<E: Encode> DpoScorer<E> {
    /// Builds a scorer. Supplying a reference model forces the normalization
    /// mode to `None`: reference-based scoring takes precedence over any
    /// reference-free normalization the config asked for.
    pub fn new(
        policy: Arc<dyn ScoringModel>,
        reference: Option<Arc<dyn ScoringModel>>,
        tokenizer: RowTokenizer<E>,
        device: Device,
    ) -> Self {
        let ref_free_norm = if reference.is_some() {
            RefFreeNorm::None
        } else {
            tokenizer.config().ref_free_norm
        };
        let label_pad_token_id = tokenizer.config().label_pad_token_id;
        let padding_value = tokenizer.special_tokens().pad_id as i64;

        Self {
            policy,
            reference,
            tokenizer,
            ref_free_norm,
            label_pad_token_id,
            padding_value,
            device,
        }
    }

    pub fn ref_free_norm(&self) -> RefFreeNorm {
        self.ref_free_norm
    }

    pub fn batch_size(&self) -> usize {
        self.tokenizer.config().batch_size
    }

    pub fn tokenize_row(&self, example: &PreferenceExample) -> Result<TokenizedRow> {
        self.tokenizer.tokenize_row(example)
    }

    pub fn collate(&self, rows: &[TokenizedRow]) -> Result<PaddedBatch> {
        collate(
            rows,
            self.tokenizer.special_tokens().pad_id,
            self.label_pad_token_id,
            &self.device,
        )
    }

    fn reduction(&self) -> LogProbReduction {
        match self.ref_free_norm {
            RefFreeNorm::Norm => LogProbReduction::Norm,
            RefFreeNorm::Avg => LogProbReduction::Average,
            RefFreeNorm::Sum | RefFreeNorm::None => LogProbReduction::Sum,
        }
    }

    /// Runs `model` once over the chosen and rejected variants stacked along
    /// the batch dimension, then splits the reduced log-probabilities back
    /// into the first-N (chosen) and last-N (rejected) slices. Stacking
    /// halves the number of forward passes versus scoring each side alone.
    pub fn concatenated_forward(
        &self,
        model: &dyn ScoringModel,
        batch: &PaddedBatch,
    ) -> Result<(Tensor, Tensor)> {
        let is_encoder_decoder = model.is_encoder_decoder();
        let concatenated = concatenated_inputs(
            batch,
            is_encoder_decoder,
            self.label_pad_token_id,
            self.padding_value,
            &self.device,
        )?;

        let labels_arg = if is_encoder_decoder {
            Some(&concatenated.labels)
        } else {
            None
        };
        let logits = model.forward(
            &concatenated.input_ids,
            &concatenated.attention_mask,
            concatenated.decoder_input_ids.as_ref(),
            labels_arg,
        )?;

        let all_logps = batch_log_probs(
            &logits,
            &concatenated.labels,
            self.reduction(),
            self.label_pad_token_id,
            is_encoder_decoder,
        )?;

        let total = all_logps.dim(0)?;
        let len_chosen = concatenated.len_chosen;
        if total != 2 * len_chosen {
            return Err(ScoringError::shape(format!(
                "expected {} scores for a doubled batch of {}, got {}",
                2 * len_chosen,
                len_chosen,
                total
            )));
        }

        let chosen = all_logps.narrow(0, 0, len_chosen)?;
        let rejected = all_logps.narrow(0, len_chosen, len_chosen)?;
        Ok((chosen, rejected))
    }

    /// Scores one batch. With `ref_free` the policy log-probabilities are
    /// reported directly (normalized per the configured reduction);
    /// otherwise each side becomes the policy-minus-reference log-ratio, the
    /// DPO implicit reward. Scores land on the host in input order.
    pub fn inference_step(
        &self,
        batch: &PaddedBatch,
        ref_free: bool,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let (policy_chosen, policy_rejected) =
            self.concatenated_forward(self.policy.as_ref(), batch)?;

        if ref_free {
            return Ok((to_host(&policy_chosen)?, to_host(&policy_rejected)?));
        }

        let reference = self.reference.as_ref().ok_or_else(|| {
            ScoringError::config("a reference model is required when ref_free is false")
        })?;
        let (ref_chosen, ref_rejected) = self.concatenated_forward(reference.as_ref(), batch)?;

        let chosen_logratios = (&policy_chosen - &ref_chosen)?;
        let rejected_logratios = (&policy_rejected - &ref_rejected)?;
        Ok((to_host(&chosen_logratios)?, to_host(&rejected_logratios)?))
    }
}

fn to_host(tensor: &Tensor) -> Result<Vec<f32>> {
    Ok(tensor
        .to_dtype(DType::F32)?
        .to_device(&Device::Cpu)?
        .to_vec1::<f32>()?)
}
