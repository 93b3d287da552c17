use serde::Serialize;

use crate::error::{Result, ScoringError};
use crate::parse::Preference;

/// One evaluated instance: the tag-parsed prediction, the prediction derived
/// from reward scores, and the golden label they are judged against.
#[derive(Debug, Clone, Copy)]
pub struct PredictedInstance {
    pub pred_preference: Preference,
    pub reward_score_pred_preference: Preference,
    pub golden_preference: Preference,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    pub acc: f64,
    pub reward_score_acc: f64,
    pub sample_num: usize,
}

/// Accuracy of both predictors against the golden labels.
pub fn preference_accuracy(instances: &[PredictedInstance]) -> Result<MetricReport> {
    if instances.is_empty() {
        return Err(ScoringError::input(
            "cannot compute preference accuracy over zero instances",
        ));
    }

    let mut num_true = 0usize;
    let mut reward_score_num_true = 0usize;
    for instance in instances {
        if instance.pred_preference == instance.golden_preference {
            num_true += 1;
        }
        if instance.reward_score_pred_preference == instance.golden_preference {
            reward_score_num_true += 1;
        }
    }

    Ok(MetricReport {
        acc: num_true as f64 / instances.len() as f64,
        reward_score_acc: reward_score_num_true as f64 / instances.len() as f64,
        sample_num: instances.len(),
    })
}
