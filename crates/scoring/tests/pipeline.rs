use std::sync::Arc;

use candle_core::{Device, Tensor};
use scoring::{
    compute_feedback, compute_feedback_dual, DpoScorer, Encode, PreferenceExample, Result,
    RowTokenizer, ScorerConfig, ScoringModel, SpecialTokens,
};

const VOCAB: usize = 1024;
const BOS: u32 = 1;
const EOS: u32 = 2;
const PAD: u32 = 0;

struct CharEncoder;

impl Encode for CharEncoder {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.chars().map(|c| c as u32 + 10).collect())
    }
}

/// Assigns extra logit mass to a fixed set of favored token ids; sequences
/// whose label tokens are favored score higher under every reduction.
struct FavoredTokensModel {
    favored: Vec<u32>,
    bias: f32,
}

impl ScoringModel for FavoredTokensModel {
    fn forward(
        &self,
        input_ids: &Tensor,
        _attention_mask: &Tensor,
        _decoder_input_ids: Option<&Tensor>,
        _labels: Option<&Tensor>,
    ) -> candle_core::Result<Tensor> {
        let (batch, seq) = input_ids.dims2()?;
        let mut values = vec![0f32; batch * seq * VOCAB];
        for position in 0..batch * seq {
            for &token in &self.favored {
                values[position * VOCAB + token as usize] = self.bias;
            }
        }
        Tensor::from_vec(values, (batch, seq, VOCAB), input_ids.device())
    }
}

fn build_scorer(favored_text: &str) -> DpoScorer<CharEncoder> {
    let favored: Vec<u32> = CharEncoder.encode(favored_text).unwrap();
    let model = Arc::new(FavoredTokensModel { favored, bias: 6.0 });
    let tokenizer = RowTokenizer::new(
        CharEncoder,
        SpecialTokens::new(BOS, EOS, PAD),
        ScorerConfig {
            ref_free_norm: scoring::RefFreeNorm::Avg,
            ..ScorerConfig::default()
        },
    )
    .unwrap();
    DpoScorer::new(model, None, tokenizer, Device::Cpu)
}

fn example_set() -> Vec<PreferenceExample> {
    vec![
        PreferenceExample::new("pick one: ", "good", "bad!"),
        PreferenceExample::new("again: ", "good", "zzzz"),
        PreferenceExample::new("short prompt ", "good", "qqqq"),
        PreferenceExample::new("one more for the partial batch: ", "good", "wwww"),
        PreferenceExample::new("trailing example ", "good", "vvvv"),
    ]
}

#[test]
fn feedback_scores_whole_dataset_in_order() {
    let scorer = build_scorer("good");
    let examples = example_set();

    // Batch size 2 over 5 examples leaves a partial final batch, which must
    // still be scored.
    let records = compute_feedback(&scorer, &examples, 2).unwrap();
    assert_eq!(records.len(), examples.len());

    for record in &records {
        assert!(record.chosen_score > 0.0 && record.chosen_score < 1.0);
        assert!(record.rejected_score > 0.0 && record.rejected_score < 1.0);
        assert!((record.chosen_score + record.rejected_score - 1.0).abs() < 1e-5);
        // The model favors exactly the chosen answer's tokens.
        assert!(record.chosen_score > record.rejected_score);
    }
}

#[test]
fn batch_size_does_not_change_scores() {
    let scorer = build_scorer("good");
    let examples = example_set();

    let by_ones = compute_feedback(&scorer, &examples, 1).unwrap();
    let by_threes = compute_feedback(&scorer, &examples, 3).unwrap();

    for (a, b) in by_ones.iter().zip(&by_threes) {
        assert!((a.chosen_score - b.chosen_score).abs() < 1e-5);
        assert!((a.rejected_score - b.rejected_score).abs() < 1e-5);
    }
}

#[test]
fn dual_pass_scores_both_orderings() {
    let scorer = build_scorer("good");
    let first: Vec<PreferenceExample> = example_set();
    let reversed: Vec<PreferenceExample> = first
        .iter()
        .map(|example| {
            PreferenceExample::new(
                example.prompt.clone(),
                example.rejected.clone(),
                example.chosen.clone(),
            )
        })
        .collect();

    let dual = compute_feedback_dual(&scorer, &first, &reversed, 2).unwrap();
    assert_eq!(dual.first_order.len(), first.len());
    assert_eq!(dual.reversed_order.len(), reversed.len());

    // Swapping chosen and rejected swaps the contrast.
    for (forward, backward) in dual.first_order.iter().zip(&dual.reversed_order) {
        assert!((forward.chosen_score - backward.rejected_score).abs() < 1e-5);
        assert!((forward.rejected_score - backward.chosen_score).abs() < 1e-5);
    }
}

#[test]
fn zero_batch_size_is_a_configuration_error() {
    let scorer = build_scorer("good");
    assert!(compute_feedback(&scorer, &example_set(), 0).is_err());
}
