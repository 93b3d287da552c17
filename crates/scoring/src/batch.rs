use candle_core::{Device, Tensor, WithDType, D};

use crate::error::{Result, ScoringError};
use crate::row::TokenizedRow;

/// A collated batch of tokenized rows. Each field is padded independently to
/// the batch maximum for that field's role: label tensors pad with the label
/// sentinel, input-id tensors pad with the tokenizer pad id, attention masks
/// pad with 0.
#[derive(Debug)]
pub struct PaddedBatch {
    pub chosen_input_ids: Tensor,
    pub chosen_attention_mask: Tensor,
    pub chosen_labels: Tensor,
    pub rejected_input_ids: Tensor,
    pub rejected_attention_mask: Tensor,
    pub rejected_labels: Tensor,
    pub prompt_input_ids: Tensor,
    pub prompt_attention_mask: Tensor,
    pub len: usize,
}

/// Chosen and rejected variants stacked along the batch dimension: rows
/// `[0, N)` are chosen, `[N, 2N)` rejected.
#[derive(Debug)]
pub struct ConcatenatedBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub labels: Tensor,
    pub decoder_input_ids: Option<Tensor>,
    pub len_chosen: usize,
}

/// Right-pads `tensor` along its last dimension to `length` with `pad_value`.
/// Tensors already at least `length` long are returned unchanged.
pub fn pad_to_length<V: WithDType>(tensor: &Tensor, length: usize, pad_value: V) -> Result<Tensor> {
    let dims = tensor.dims();
    let last = *dims
        .last()
        .ok_or_else(|| ScoringError::shape("cannot pad a zero-rank tensor"))?;
    if last >= length {
        return Ok(tensor.clone());
    }

    let mut pad_dims = dims.to_vec();
    *pad_dims
        .last_mut()
        .ok_or_else(|| ScoringError::shape("cannot pad a zero-rank tensor"))? = length - last;
    let filler = Tensor::full(pad_value, pad_dims, tensor.device())?.to_dtype(tensor.dtype())?;
    Ok(Tensor::cat(&[tensor, &filler], D::Minus1)?)
}

/// Collates tokenized rows into device tensors, padding each field to the
/// batch maximum per the role rule above. Input ids are widened to i64 so
/// they share a dtype with the sentinel-bearing label tensors.
pub fn collate(
    rows: &[TokenizedRow],
    pad_token_id: u32,
    label_pad_token_id: i64,
    device: &Device,
) -> Result<PaddedBatch> {
    if rows.is_empty() {
        return Err(ScoringError::input("cannot collate an empty batch"));
    }

    let chosen_input_ids = stack_ids(
        rows.iter().map(|row| row.chosen_input_ids.as_slice()),
        pad_token_id as i64,
        device,
    )?;
    let chosen_attention_mask = stack_masks(
        rows.iter().map(|row| row.chosen_attention_mask.as_slice()),
        device,
    )?;
    let chosen_labels = stack_labels(
        rows.iter().map(|row| row.chosen_labels.as_slice()),
        label_pad_token_id,
        device,
    )?;

    let rejected_input_ids = stack_ids(
        rows.iter().map(|row| row.rejected_input_ids.as_slice()),
        pad_token_id as i64,
        device,
    )?;
    let rejected_attention_mask = stack_masks(
        rows.iter().map(|row| row.rejected_attention_mask.as_slice()),
        device,
    )?;
    let rejected_labels = stack_labels(
        rows.iter().map(|row| row.rejected_labels.as_slice()),
        label_pad_token_id,
        device,
    )?;

    let prompt_input_ids = stack_ids(
        rows.iter().map(|row| row.prompt_input_ids.as_slice()),
        pad_token_id as i64,
        device,
    )?;
    let prompt_attention_mask = stack_masks(
        rows.iter().map(|row| row.prompt_attention_mask.as_slice()),
        device,
    )?;

    Ok(PaddedBatch {
        chosen_input_ids,
        chosen_attention_mask,
        chosen_labels,
        rejected_input_ids,
        rejected_attention_mask,
        rejected_labels,
        prompt_input_ids,
        prompt_attention_mask,
        len: rows.len(),
    })
}

/// Builds the batch-dimension-doubled tensors for a single forward pass. The
/// input batch is never mutated. For encoder-decoder models the encoder sees
/// the prompt repeated twice and the answers travel through the labels.
pub fn concatenated_inputs(
    batch: &PaddedBatch,
    is_encoder_decoder: bool,
    label_pad_token_id: i64,
    padding_value: i64,
    device: &Device,
) -> Result<ConcatenatedBatch> {
    let max_length = if is_encoder_decoder {
        batch.chosen_labels.dim(1)?.max(batch.rejected_labels.dim(1)?)
    } else {
        batch
            .chosen_input_ids
            .dim(1)?
            .max(batch.rejected_input_ids.dim(1)?)
    };

    let labels = Tensor::cat(
        &[
            pad_to_length(&batch.chosen_labels, max_length, label_pad_token_id)?,
            pad_to_length(&batch.rejected_labels, max_length, label_pad_token_id)?,
        ],
        0,
    )?
    .to_device(device)?;

    if is_encoder_decoder {
        let prompt_ids = batch.prompt_input_ids.to_device(device)?;
        let prompt_mask = batch.prompt_attention_mask.to_device(device)?;
        return Ok(ConcatenatedBatch {
            input_ids: Tensor::cat(&[&prompt_ids, &prompt_ids], 0)?,
            attention_mask: Tensor::cat(&[&prompt_mask, &prompt_mask], 0)?,
            labels,
            decoder_input_ids: None,
            len_chosen: batch.len,
        });
    }

    let input_ids = Tensor::cat(
        &[
            pad_to_length(&batch.chosen_input_ids, max_length, padding_value)?,
            pad_to_length(&batch.rejected_input_ids, max_length, padding_value)?,
        ],
        0,
    )?
    .to_device(device)?;

    let attention_mask = Tensor::cat(
        &[
            pad_to_length(&batch.chosen_attention_mask, max_length, 0u32)?,
            pad_to_length(&batch.rejected_attention_mask, max_length, 0u32)?,
        ],
        0,
    )?
    .to_device(device)?;

    Ok(ConcatenatedBatch {
        input_ids,
        attention_mask,
        labels,
        decoder_input_ids: None,
        len_chosen: batch.len,
    })
}

fn stack_ids<'a>(
    rows: impl Iterator<Item = &'a [u32]> + Clone,
    pad_value: i64,
    device: &Device,
) -> Result<Tensor> {
    let max_len = rows.clone().map(<[u32]>::len).max().unwrap_or(0).max(1);
    let mut flat: Vec<i64> = Vec::new();
    let mut count = 0;
    for row in rows {
        flat.extend(row.iter().map(|&id| id as i64));
        flat.extend(std::iter::repeat(pad_value).take(max_len - row.len()));
        count += 1;
    }
    Tensor::from_vec(flat, (count, max_len), device).map_err(ScoringError::from)
}

fn stack_masks<'a>(
    rows: impl Iterator<Item = &'a [u32]> + Clone,
    device: &Device,
) -> Result<Tensor> {
    let max_len = rows.clone().map(<[u32]>::len).max().unwrap_or(0).max(1);
    let mut flat: Vec<u32> = Vec::new();
    let mut count = 0;
    for row in rows {
        flat.extend_from_slice(row);
        flat.extend(std::iter::repeat(0).take(max_len - row.len()));
        count += 1;
    }
    Tensor::from_vec(flat, (count, max_len), device).map_err(ScoringError::from)
}

fn stack_labels<'a>(
    rows: impl Iterator<Item = &'a [i64]> + Clone,
    label_pad: i64,
    device: &Device,
) -> Result<Tensor> {
    let max_len = rows.clone().map(<[i64]>::len).max().unwrap_or(0).max(1);
    let mut flat: Vec<i64> = Vec::new();
    let mut count = 0;
    for row in rows {
        flat.extend_from_slice(row);
        flat.extend(std::iter::repeat(label_pad).take(max_len - row.len()));
        count += 1;
    }
    Tensor::from_vec(flat, (count, max_len), device).map_err(ScoringError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LABEL_PAD_TOKEN_ID;

    fn row(prompt: &[u32], answer: &[u32]) -> TokenizedRow {
        let assemble = |answer: &[u32]| {
            let mut ids = prompt.to_vec();
            ids.extend_from_slice(answer);
            let mask = vec![1u32; ids.len()];
            let labels: Vec<i64> = ids
                .iter()
                .enumerate()
                .map(|(idx, &id)| {
                    if idx < prompt.len() {
                        LABEL_PAD_TOKEN_ID
                    } else {
                        id as i64
                    }
                })
                .collect();
            (ids, mask, labels)
        };

        let (chosen_input_ids, chosen_attention_mask, chosen_labels) = assemble(answer);
        let mut longer = answer.to_vec();
        longer.push(77);
        let (rejected_input_ids, rejected_attention_mask, rejected_labels) = assemble(&longer);

        TokenizedRow {
            prompt_input_ids: prompt.to_vec(),
            prompt_attention_mask: vec![1; prompt.len()],
            chosen_input_ids,
            chosen_attention_mask,
            chosen_labels,
            rejected_input_ids,
            rejected_attention_mask,
            rejected_labels,
        }
    }

    #[test]
    fn pad_to_length_pads_only_when_short() {
        let device = Device::Cpu;
        let t = Tensor::from_vec(vec![1i64, 2, 3], (1, 3), &device).unwrap();

        let padded = pad_to_length(&t, 5, -100i64).unwrap();
        assert_eq!(
            padded.to_vec2::<i64>().unwrap(),
            vec![vec![1, 2, 3, -100, -100]]
        );

        let unchanged = pad_to_length(&t, 2, -100i64).unwrap();
        assert_eq!(unchanged.to_vec2::<i64>().unwrap(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn collate_pads_each_role_with_its_own_value() {
        let device = Device::Cpu;
        let rows = vec![row(&[1, 11], &[21]), row(&[1, 11, 12, 13], &[22, 23])];
        let batch = collate(&rows, 9, LABEL_PAD_TOKEN_ID, &device).unwrap();

        let ids = batch.chosen_input_ids.to_vec2::<i64>().unwrap();
        assert_eq!(ids[0], vec![1, 11, 21, 9, 9, 9]);
        assert_eq!(ids[1], vec![1, 11, 12, 13, 22, 23]);

        let mask = batch.chosen_attention_mask.to_vec2::<u32>().unwrap();
        assert_eq!(mask[0], vec![1, 1, 1, 0, 0, 0]);

        let labels = batch.chosen_labels.to_vec2::<i64>().unwrap();
        assert_eq!(labels[0], vec![-100, -100, 21, -100, -100, -100]);
        assert_eq!(labels[1], vec![-100, -100, -100, -100, 22, 23]);
    }

    #[test]
    fn concatenation_preserves_chosen_then_rejected_order() {
        let device = Device::Cpu;
        let rows = vec![row(&[1, 11], &[21]), row(&[1, 12], &[22])];
        let batch = collate(&rows, 9, LABEL_PAD_TOKEN_ID, &device).unwrap();
        let concat =
            concatenated_inputs(&batch, false, LABEL_PAD_TOKEN_ID, 9, &device).unwrap();

        assert_eq!(concat.len_chosen, 2);
        assert_eq!(concat.input_ids.dims(), &[4, 4]);

        let ids = concat.input_ids.to_vec2::<i64>().unwrap();
        let chosen = batch.chosen_input_ids.to_vec2::<i64>().unwrap();
        let rejected = batch.rejected_input_ids.to_vec2::<i64>().unwrap();

        // Rows [0, N) must equal the chosen batch (padded), [N, 2N) the
        // rejected batch, for every field.
        for (got, want) in ids[..2].iter().zip(&chosen) {
            assert_eq!(&got[..want.len()], want.as_slice());
            assert!(got[want.len()..].iter().all(|&v| v == 9));
        }
        for (got, want) in ids[2..].iter().zip(&rejected) {
            assert_eq!(&got[..want.len()], want.as_slice());
        }

        let labels = concat.labels.to_vec2::<i64>().unwrap();
        let chosen_labels = batch.chosen_labels.to_vec2::<i64>().unwrap();
        for (got, want) in labels[..2].iter().zip(&chosen_labels) {
            assert_eq!(&got[..want.len()], want.as_slice());
            assert!(got[want.len()..].iter().all(|&v| v == LABEL_PAD_TOKEN_ID));
        }

        let mask = concat.attention_mask.to_vec2::<u32>().unwrap();
        let chosen_mask = batch.chosen_attention_mask.to_vec2::<u32>().unwrap();
        for (got, want) in mask[..2].iter().zip(&chosen_mask) {
            assert_eq!(&got[..want.len()], want.as_slice());
            assert!(got[want.len()..].iter().all(|&v| v == 0));
        }
    }

    #[test]
    fn encoder_decoder_repeats_the_prompt() {
        let device = Device::Cpu;
        let rows = vec![row(&[1, 11, 12], &[21])];
        let batch = collate(&rows, 9, LABEL_PAD_TOKEN_ID, &device).unwrap();
        let concat = concatenated_inputs(&batch, true, LABEL_PAD_TOKEN_ID, 9, &device).unwrap();

        let ids = concat.input_ids.to_vec2::<i64>().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
        assert_eq!(ids[0], vec![1, 11, 12]);
        assert_eq!(concat.labels.dim(0).unwrap(), 2);
    }

    #[test]
    fn collate_rejects_empty_batches() {
        assert!(collate(&[], 0, LABEL_PAD_TOKEN_ID, &Device::Cpu).is_err());
    }
}
