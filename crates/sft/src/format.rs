use scoring::Encode;
use serde::Deserialize;

use crate::error::{Result, SftError};

/// One instruction-tuning record. `input` is frequently empty in Alpaca-style
/// datasets and is folded into the question text when present.
#[derive(Debug, Clone, Deserialize)]
pub struct InstructionSample {
    pub instruction: String,
    #[serde(default)]
    pub input: String,
    pub output: String,
}

impl InstructionSample {
    pub fn new(
        instruction: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Renders a sample into the question/answer prompt format used for
/// fine-tuning.
pub fn prepare_sample_text(sample: &InstructionSample) -> String {
    format!(
        "Question: {} {}\n\nAnswer: {}",
        sample.instruction, sample.input, sample.output
    )
}

/// Estimates the average number of characters per token over the first
/// `nb_examples` samples of the dataset. Used to size packed sequences.
pub fn chars_token_ratio<E: Encode>(
    samples: &[InstructionSample],
    encoder: &E,
    nb_examples: usize,
) -> Result<f64> {
    if samples.is_empty() || nb_examples == 0 {
        return Err(SftError::input(
            "chars_token_ratio needs at least one sample",
        ));
    }

    let mut total_characters = 0usize;
    let mut total_tokens = 0usize;
    for sample in samples.iter().take(nb_examples) {
        let text = prepare_sample_text(sample);
        total_characters += text.chars().count();
        total_tokens += encoder.encode(&text)?.len();
    }

    if total_tokens == 0 {
        return Err(SftError::tokenization(
            "sampled text tokenized to zero tokens",
        ));
    }

    Ok(total_characters as f64 / total_tokens as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CharEncoder;

    impl Encode for CharEncoder {
        fn encode(&self, text: &str) -> scoring::Result<Vec<u32>> {
            Ok(text.chars().map(|c| c as u32 + 10).collect())
        }
    }

    struct PairEncoder;

    impl Encode for PairEncoder {
        fn encode(&self, text: &str) -> scoring::Result<Vec<u32>> {
            // Two characters per token.
            Ok((0..text.chars().count() / 2).map(|i| i as u32).collect())
        }
    }

    #[test]
    fn formats_question_answer_text() {
        let sample = InstructionSample::new("Add the numbers.", "2 and 2", "4");
        assert_eq!(
            prepare_sample_text(&sample),
            "Question: Add the numbers. 2 and 2\n\nAnswer: 4"
        );
    }

    #[test]
    fn empty_input_still_renders_with_separator_space() {
        let sample = InstructionSample::new("Say hi.", "", "hi");
        assert_eq!(prepare_sample_text(&sample), "Question: Say hi. \n\nAnswer: hi");
    }

    #[test]
    fn char_level_encoder_gives_ratio_one() {
        let samples = vec![InstructionSample::new("abcd", "ef", "gh")];
        let ratio = chars_token_ratio(&samples, &CharEncoder, 400).unwrap();
        assert!((ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn coarser_encoder_raises_the_ratio() {
        // 28 characters rendered, two characters per token.
        let samples = vec![InstructionSample::new("abc", "ef", "gh")];
        let ratio = chars_token_ratio(&samples, &PairEncoder, 400).unwrap();
        assert!((ratio - 2.0).abs() < 1e-6);
    }

    #[test]
    fn empty_dataset_is_rejected() {
        assert!(chars_token_ratio(&[], &CharEncoder, 400).is_err());
    }
}
