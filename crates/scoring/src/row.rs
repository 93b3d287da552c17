use serde::Deserialize;

use crate::config::{ScorerConfig, SpecialTokens, TruncationSide};
use crate::error::{Result, ScoringError};

/// One preference pair as read from a dataset record. Callers with the
/// `text_chosen`/`text_rejected` schema deserialize into the same shape.
#[derive(Debug, Clone, Deserialize)]
pub struct PreferenceExample {
    pub prompt: String,
    #[serde(alias = "text_chosen")]
    pub chosen: String,
    #[serde(alias = "text_rejected")]
    pub rejected: String,
}

impl PreferenceExample {
    pub fn new(
        prompt: impl Into<String>,
        chosen: impl Into<String>,
        rejected: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            chosen: chosen.into(),
            rejected: rejected.into(),
        }
    }
}

/// Minimal encoder surface the row tokenizer depends on. Implementations must
/// not add special tokens; BOS/EOS handling happens in [`RowTokenizer`].
pub trait Encode {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
}

impl Encode for tokenizers::Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = tokenizers::TokenizerImpl::encode(&**self, text, false)
            .map_err(|err| ScoringError::Tokenization(err.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }
}

/// Intermediate result of jointly tokenizing `prompt + answer` and splitting
/// at the (possibly merge-corrected) prompt boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedAnswer {
    pub prompt_input_ids: Vec<u32>,
    pub prompt_attention_mask: Vec<u32>,
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

/// One fully prepared scoring example: the shared prompt plus the chosen and
/// rejected full sequences with prompt-masked labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedRow {
    pub prompt_input_ids: Vec<u32>,
    pub prompt_attention_mask: Vec<u32>,
    pub chosen_input_ids: Vec<u32>,
    pub chosen_attention_mask: Vec<u32>,
    pub chosen_labels: Vec<i64>,
    pub rejected_input_ids: Vec<u32>,
    pub rejected_attention_mask: Vec<u32>,
    pub rejected_labels: Vec<i64>,
}

/// Turns raw preference triples into [`TokenizedRow`]s, honoring the length
/// budget and truncation side from [`ScorerConfig`].
pub struct RowTokenizer<E: Encode> {
    encoder: E,
    special: SpecialTokens,
    config: ScorerConfig,
}

impl<E: Encode> RowTokenizer<E> {
    pub fn new(encoder: E, special: SpecialTokens, config: ScorerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            encoder,
            special,
            config,
        })
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Tokenizes `prompt + answer` jointly, then slices the answer off at the
    /// prompt boundary. Tokenizers only guarantee
    /// `enc(a + b) = enc(a) + enc(a + b)[len(enc(a))..]`, not
    /// `enc(a + b) = enc(a) + enc(b)`, so the answer must come from the joint
    /// encoding. When the boundary token merged, the independently tokenized
    /// prompt no longer prefixes the joint encoding and the split index moves
    /// back by one.
    pub fn build_tokenized_answer(&self, prompt: &str, answer: &str) -> Result<TokenizedAnswer> {
        let full = self.encoder.encode(&format!("{prompt}{answer}"))?;
        let prompt_input_ids = self.encoder.encode(prompt)?;

        if prompt_input_ids.len() > full.len() {
            return Err(ScoringError::input(
                "prompt input ids and answer input ids should have the same length",
            ));
        }

        let mut split = prompt_input_ids.len();
        if split > 0 && full[..split] != prompt_input_ids[..] {
            split -= 1;
        }

        let prompt_input_ids = full[..split].to_vec();
        let input_ids = full[split..].to_vec();

        // Unpadded single-sequence encodings attend everywhere.
        Ok(TokenizedAnswer {
            prompt_attention_mask: vec![1; prompt_input_ids.len()],
            attention_mask: vec![1; input_ids.len()],
            prompt_input_ids,
            input_ids,
        })
    }

    /// Produces the full [`TokenizedRow`] for a preference example: BOS on
    /// every prompt variant, EOS on both answers, prompt truncation to the
    /// configured side when `prompt + longer answer` exceeds `max_length`,
    /// answer truncation when that is still not enough, and labels equal to
    /// the input ids with the prompt span masked to the label sentinel.
    pub fn tokenize_row(&self, example: &PreferenceExample) -> Result<TokenizedRow> {
        if example.prompt.is_empty() {
            return Err(ScoringError::input("prompt must be a non-empty string"));
        }
        if example.chosen.is_empty() {
            return Err(ScoringError::input("chosen must be a non-empty string"));
        }
        if example.rejected.is_empty() {
            return Err(ScoringError::input("rejected must be a non-empty string"));
        }

        let prompt_ids = self.encoder.encode(&example.prompt)?;
        let mut prompt_tokens = TokenizedAnswer {
            prompt_attention_mask: vec![1; prompt_ids.len()],
            prompt_input_ids: prompt_ids,
            input_ids: Vec::new(),
            attention_mask: Vec::new(),
        };
        let mut chosen_tokens = self.build_tokenized_answer(&example.prompt, &example.chosen)?;
        let mut rejected_tokens =
            self.build_tokenized_answer(&example.prompt, &example.rejected)?;

        for tokens in [
            &mut prompt_tokens,
            &mut chosen_tokens,
            &mut rejected_tokens,
        ] {
            tokens.prompt_input_ids.insert(0, self.special.bos_id);
            tokens.prompt_attention_mask.insert(0, 1);
        }

        for tokens in [&mut chosen_tokens, &mut rejected_tokens] {
            tokens.input_ids.push(self.special.eos_id);
            tokens.attention_mask.push(1);
        }

        let longer_response_length = chosen_tokens
            .input_ids
            .len()
            .max(rejected_tokens.input_ids.len());

        // If the combined sequence is too long, truncate the prompt first.
        for tokens in [
            &mut chosen_tokens,
            &mut rejected_tokens,
            &mut prompt_tokens,
        ] {
            if tokens.prompt_input_ids.len() + longer_response_length > self.config.max_length {
                truncate_prompt(
                    &mut tokens.prompt_input_ids,
                    &mut tokens.prompt_attention_mask,
                    self.config.truncation_side,
                    self.config.max_prompt_length,
                );
            }
        }

        // If that is still too long, truncate the response.
        let answer_budget = self.config.max_length - self.config.max_prompt_length;
        for tokens in [&mut chosen_tokens, &mut rejected_tokens] {
            if tokens.prompt_input_ids.len() + longer_response_length > self.config.max_length {
                tokens.input_ids.truncate(answer_budget);
                tokens.attention_mask.truncate(answer_budget);
            }
        }

        let (chosen_input_ids, chosen_attention_mask, chosen_labels) =
            assemble_sequence(&chosen_tokens, self.config.label_pad_token_id);
        let (rejected_input_ids, rejected_attention_mask, rejected_labels) =
            assemble_sequence(&rejected_tokens, self.config.label_pad_token_id);

        Ok(TokenizedRow {
            prompt_input_ids: prompt_tokens.prompt_input_ids,
            prompt_attention_mask: prompt_tokens.prompt_attention_mask,
            chosen_input_ids,
            chosen_attention_mask,
            chosen_labels,
            rejected_input_ids,
            rejected_attention_mask,
            rejected_labels,
        })
    }
}

fn truncate_prompt(
    ids: &mut Vec<u32>,
    mask: &mut Vec<u32>,
    side: TruncationSide,
    max_prompt_length: usize,
) {
    match side {
        TruncationSide::KeepStart => {
            ids.truncate(max_prompt_length);
            mask.truncate(max_prompt_length);
        }
        TruncationSide::KeepEnd => {
            if ids.len() > max_prompt_length {
                let cut = ids.len() - max_prompt_length;
                ids.drain(..cut);
                mask.drain(..cut);
            }
        }
    }
}

fn assemble_sequence(tokens: &TokenizedAnswer, label_pad: i64) -> (Vec<u32>, Vec<u32>, Vec<i64>) {
    let prompt_len = tokens.prompt_input_ids.len();
    let mut input_ids = Vec::with_capacity(prompt_len + tokens.input_ids.len());
    input_ids.extend_from_slice(&tokens.prompt_input_ids);
    input_ids.extend_from_slice(&tokens.input_ids);

    let mut attention_mask = Vec::with_capacity(input_ids.len());
    attention_mask.extend_from_slice(&tokens.prompt_attention_mask);
    attention_mask.extend_from_slice(&tokens.attention_mask);

    let labels: Vec<i64> = input_ids
        .iter()
        .enumerate()
        .map(|(idx, &id)| if idx < prompt_len { label_pad } else { id as i64 })
        .collect();

    (input_ids, attention_mask, labels)
}
