use candle_core::{DType, Tensor, D};
use candle_nn::ops;
use serde::Deserialize;

use crate::error::{Result, ScoringError};

/// How per-token log-probabilities collapse into one score per sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogProbReduction {
    /// Sum of log-probabilities over unmasked positions.
    Sum,
    /// Mean log-probability per unmasked token.
    Average,
    /// Negative L2 norm of the unmasked per-token log-probabilities. Not a
    /// log-probability; used as a reference-free proxy reward.
    Norm,
}

impl Default for LogProbReduction {
    fn default() -> Self {
        LogProbReduction::Sum
    }
}

/// Computes one score per batch row: the reduced log-probability of the label
/// tokens under `logits`, skipping positions whose label equals
/// `label_pad_token_id`. For decoder-only models the logits at position `i`
/// predict the token at `i + 1`, so logits and labels are shifted against
/// each other by one step before masking.
pub fn batch_log_probs(
    logits: &Tensor,
    labels: &Tensor,
    reduction: LogProbReduction,
    label_pad_token_id: i64,
    is_encoder_decoder: bool,
) -> Result<Tensor> {
    let logit_dims = logits.dims();
    let label_dims = labels.dims();
    if logit_dims.len() != 3 || &logit_dims[..2] != label_dims {
        return Err(ScoringError::shape(format!(
            "logits batch/sequence dims {:?} and labels {:?} must match",
            logit_dims, label_dims
        )));
    }

    let (labels, logits) = if is_encoder_decoder {
        (labels.clone(), logits.clone())
    } else {
        let seq = label_dims[1];
        if seq < 2 {
            return Err(ScoringError::shape(
                "decoder-only scoring needs at least two sequence positions to shift",
            ));
        }
        (labels.narrow(1, 1, seq - 1)?, logits.narrow(1, 0, seq - 1)?)
    };

    let loss_mask = labels.ne(label_pad_token_id)?;
    let mask_f32 = loss_mask.to_dtype(DType::F32)?;

    // Masked positions get a dummy index of 0; their contribution is zeroed
    // out below.
    let safe_labels = (&labels * &loss_mask.to_dtype(labels.dtype())?)?.to_dtype(DType::U32)?;

    let log_probs = ops::log_softmax(&logits, D::Minus1)?;
    let per_token = log_probs
        .gather(&safe_labels.unsqueeze(2)?, 2)?
        .squeeze(2)?;
    let masked = (&per_token * &mask_f32)?;

    match reduction {
        LogProbReduction::Sum => Ok(masked.sum(D::Minus1)?),
        LogProbReduction::Average => {
            let sums = masked.sum(D::Minus1)?;
            let counts = mask_f32.sum(D::Minus1)?;
            Ok((&sums / &counts)?)
        }
        LogProbReduction::Norm => Ok(masked.sqr()?.sum(D::Minus1)?.sqrt()?.neg()?),
    }
}
