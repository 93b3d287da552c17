use candle_core::{DType, Tensor, D};
use candle_nn::ops;
use scoring::LABEL_PAD_TOKEN_ID;

use crate::error::{Result, SftError};

/// Next-token cross entropy over `[batch, seq, vocab]` logits with sentinel
/// labels excluded. The shift is applied internally: logits at position `t`
/// are scored against the label at position `t + 1`.
#[derive(Debug, Clone)]
pub struct MaskedCrossEntropy {
    label_pad_token_id: i64,
}

impl MaskedCrossEntropy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label_pad_token_id(mut self, label_pad_token_id: i64) -> Self {
        self.label_pad_token_id = label_pad_token_id;
        self
    }

    pub fn compute(&self, logits: &Tensor, labels: &Tensor) -> Result<SftLossOutput> {
        let (batch, seq, vocab) = logits.dims3().map_err(|_| {
            SftError::input("cross entropy expects logits shaped [batch, seq, vocab]")
        })?;
        if labels.dims() != [batch, seq] {
            return Err(SftError::input(format!(
                "labels shape {:?} does not match logits batch/sequence dims [{}, {}]",
                labels.dims(),
                batch,
                seq
            )));
        }
        if seq < 2 {
            return Err(SftError::input(
                "next-token loss needs sequences of at least two tokens",
            ));
        }

        let logits = logits.narrow(1, 0, seq - 1)?;
        let labels = labels.narrow(1, 1, seq - 1)?;

        let token_count = batch * (seq - 1);
        let logits_flat = logits.reshape((token_count, vocab))?;
        let labels_flat = labels.reshape((token_count,))?.to_dtype(DType::I64)?;

        let valid_mask = labels_flat.ne(self.label_pad_token_id)?;
        let valid_mask_f32 = valid_mask.to_dtype(DType::F32)?;
        let total_tokens = valid_mask_f32.sum_all()?.to_vec0::<f32>()?.round() as usize;
        if total_tokens == 0 {
            return Err(SftError::input(
                "no valid tokens remain after masking sentinel labels",
            ));
        }

        // Sentinel positions are remapped to id 0 before the gather; their
        // contribution is zeroed by the mask afterwards.
        let safe_labels = (&labels_flat * &valid_mask.to_dtype(DType::I64)?)?.to_dtype(DType::U32)?;

        let log_probs = ops::log_softmax(&logits_flat, D::Minus1)?;
        let nll = log_probs
            .gather(&safe_labels.unsqueeze(1)?, 1)?
            .squeeze(1)?
            .neg()?;

        let masked_nll = (&nll * &valid_mask_f32)?;
        let loss = masked_nll
            .sum_all()?
            .affine(1f64 / total_tokens as f64, 0.0)?;
        let average_loss = loss.to_vec0::<f32>()?;

        let predictions = logits_flat.argmax(D::Minus1)?.to_dtype(DType::I64)?;
        let correct = predictions.eq(&labels_flat)?.to_dtype(DType::F32)?;
        let correct_tokens = (&correct * &valid_mask_f32)?
            .sum_all()?
            .to_vec0::<f32>()?
            .round() as usize;

        Ok(SftLossOutput {
            loss,
            metrics: SftLossMetrics {
                average_loss,
                total_tokens,
                correct_tokens,
            },
        })
    }
}

impl Default for MaskedCrossEntropy {
    fn default() -> Self {
        Self {
            label_pad_token_id: LABEL_PAD_TOKEN_ID,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SftLossOutput {
    pub loss: Tensor,
    pub metrics: SftLossMetrics,
}

#[derive(Debug, Clone)]
pub struct SftLossMetrics {
    average_loss: f32,
    total_tokens: usize,
    correct_tokens: usize,
}

impl SftLossMetrics {
    pub fn average_loss(&self) -> f32 {
        self.average_loss
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn correct_tokens(&self) -> usize {
        self.correct_tokens
    }

    pub fn accuracy(&self) -> f32 {
        if self.total_tokens == 0 {
            0.0
        } else {
            self.correct_tokens as f32 / self.total_tokens as f32
        }
    }

    pub fn perplexity(&self) -> f32 {
        self.average_loss.exp()
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    const VOCAB: usize = 8;

    fn uniform_logits(batch: usize, seq: usize) -> Tensor {
        Tensor::zeros((batch, seq, VOCAB), DType::F32, &Device::Cpu).unwrap()
    }

    fn labels(rows: Vec<Vec<i64>>) -> Tensor {
        let seq = rows[0].len();
        let flat: Vec<i64> = rows.into_iter().flatten().collect();
        Tensor::from_vec(flat.clone(), (flat.len() / seq, seq), &Device::Cpu).unwrap()
    }

    #[test]
    fn uniform_logits_give_log_vocab_loss() {
        let logits = uniform_logits(1, 4);
        let labels = labels(vec![vec![1, 2, 3, 4]]);
        let output = MaskedCrossEntropy::new().compute(&logits, &labels).unwrap();
        let expected = (VOCAB as f32).ln();
        assert!((output.metrics.average_loss() - expected).abs() < 1e-5);
        // 3 shifted positions, all valid.
        assert_eq!(output.metrics.total_tokens(), 3);
        assert!((output.metrics.perplexity() - VOCAB as f32).abs() < 1e-3);
    }

    #[test]
    fn sentinel_labels_are_excluded() {
        let logits = uniform_logits(1, 4);
        let masked = labels(vec![vec![-100, -100, 3, 4]]);
        let output = MaskedCrossEntropy::new().compute(&logits, &masked).unwrap();
        // Position 0 is dropped by the shift; one remaining sentinel masks
        // one of the three shifted positions.
        assert_eq!(output.metrics.total_tokens(), 2);
    }

    #[test]
    fn peaked_logits_drive_loss_down_and_accuracy_up() {
        let mut values = vec![0f32; 2 * 4 * VOCAB];
        // Every position predicts token 5 with high confidence.
        for position in 0..2 * 4 {
            values[position * VOCAB + 5] = 12.0;
        }
        let logits = Tensor::from_vec(values, (2, 4, VOCAB), &Device::Cpu).unwrap();
        let labels = labels(vec![vec![5, 5, 5, 5], vec![5, 5, 5, 5]]);

        let output = MaskedCrossEntropy::new().compute(&logits, &labels).unwrap();
        assert!(output.metrics.average_loss() < 0.01);
        assert!((output.metrics.accuracy() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn all_sentinel_labels_error() {
        let logits = uniform_logits(1, 3);
        let masked = labels(vec![vec![-100, -100, -100]]);
        assert!(MaskedCrossEntropy::new().compute(&logits, &masked).is_err());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let logits = uniform_logits(1, 4);
        let bad = labels(vec![vec![1, 2, 3]]);
        assert!(MaskedCrossEntropy::new().compute(&logits, &bad).is_err());
    }
}
