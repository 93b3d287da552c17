use indicatif::ProgressBar;

use crate::error::{Result, ScoringError};
use crate::inference::DpoScorer;
use crate::row::{Encode, PreferenceExample, TokenizedRow};

/// Final per-example artifact of a feedback pass, in input order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRecord {
    pub chosen_score: f32,
    pub rejected_score: f32,
}

/// Score sets from the dual-order pass. Reconciling the two orderings into a
/// single debiased label is a downstream concern.
#[derive(Debug, Clone)]
pub struct DualFeedback {
    pub first_order: Vec<ScoreRecord>,
    pub reversed_order: Vec<ScoreRecord>,
}

/// Numerically stable two-way softmax. For any finite pair the outputs lie in
/// (0, 1) and sum to 1.
pub fn softmax_pair(chosen: f32, rejected: f32) -> (f32, f32) {
    let max = chosen.max(rejected);
    let exp_chosen = (chosen - max).exp();
    let exp_rejected = (rejected - max).exp();
    let total = exp_chosen + exp_rejected;
    (exp_chosen / total, exp_rejected / total)
}

/// Runs the whole dataset through the scorer in reference-free mode:
/// fixed-size ordered batches (the final partial batch included), one
/// `inference_step` per batch, and a two-way softmax contrast that turns each
/// raw score pair into a probability pair. Batch `k + 1` never starts before
/// batch `k` finished, so output order matches input order.
pub fn compute_feedback<E: Encode>(
    scorer: &DpoScorer<E>,
    examples: &[PreferenceExample],
    batch_size: usize,
) -> Result<Vec<ScoreRecord>> {
    if batch_size == 0 {
        return Err(ScoringError::config("batch_size must be greater than 0"));
    }

    let progress = ProgressBar::new(examples.len() as u64);
    let mut records = Vec::with_capacity(examples.len());

    for chunk in examples.chunks(batch_size) {
        let rows: Vec<TokenizedRow> = chunk
            .iter()
            .map(|example| scorer.tokenize_row(example))
            .collect::<Result<_>>()?;
        let batch = scorer.collate(&rows)?;
        let (chosen, rejected) = scorer.inference_step(&batch, true)?;

        for (&chosen_raw, &rejected_raw) in chosen.iter().zip(rejected.iter()) {
            let (chosen_score, rejected_score) = softmax_pair(chosen_raw, rejected_raw);
            records.push(ScoreRecord {
                chosen_score,
                rejected_score,
            });
        }
        progress.inc(chunk.len() as u64);
    }

    progress.finish_and_clear();
    Ok(records)
}

/// Scores the same underlying examples under both presentation orders, for
/// later order-bias analysis.
pub fn compute_feedback_dual<E: Encode>(
    scorer: &DpoScorer<E>,
    first_order: &[PreferenceExample],
    reversed_order: &[PreferenceExample],
    batch_size: usize,
) -> Result<DualFeedback> {
    let first = compute_feedback(scorer, first_order, batch_size)?;
    let reversed = compute_feedback(scorer, reversed_order, batch_size)?;
    Ok(DualFeedback {
        first_order: first,
        reversed_order: reversed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_pair_is_a_probability_pair() {
        for (a, b) in [(0.0, 0.0), (3.5, -2.0), (-40.0, -41.5), (850.0, 849.0)] {
            let (p, q) = softmax_pair(a, b);
            assert!(p > 0.0 && p < 1.0, "p={p} for ({a}, {b})");
            assert!(q > 0.0 && q < 1.0, "q={q} for ({a}, {b})");
            assert!((p + q - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn softmax_pair_orders_by_score() {
        let (p, q) = softmax_pair(1.0, -1.0);
        assert!(p > q);
        let (equal_p, equal_q) = softmax_pair(0.25, 0.25);
        assert!((equal_p - equal_q).abs() < 1e-6);
    }

    #[test]
    fn softmax_pair_survives_large_magnitudes() {
        let (p, q) = softmax_pair(1e4, -1e4);
        assert!(p > 0.99);
        assert!(q < 0.01);
        assert!(p.is_finite() && q.is_finite());
    }
}
