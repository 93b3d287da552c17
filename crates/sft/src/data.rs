use std::collections::VecDeque;

use candle_core::{Device, Tensor};
use scoring::Encode;

use crate::error::{Result, SftError};
use crate::format::{prepare_sample_text, InstructionSample};

/// Batch of packed constant-length sequences. Labels equal the input ids;
/// the loss applies the next-token shift itself.
#[derive(Debug)]
pub struct SftBatch {
    pub input_ids: Tensor,
    pub labels: Tensor,
}

/// Packs formatted instruction samples into constant-length token sequences.
///
/// Samples are rendered with [`prepare_sample_text`], tokenized, and joined
/// through a token buffer with an EOS separator between samples, so every
/// emitted sequence is exactly `seq_length` tokens and sample boundaries fall
/// wherever they fall. Trailing tokens that cannot fill a whole sequence are
/// dropped.
pub struct PackedInstructionLoader<E: Encode> {
    samples: Vec<InstructionSample>,
    encoder: E,
    device: Device,
    seq_length: usize,
    batch_size: usize,
    eos_token_id: u32,
    next_sample: usize,
    token_buffer: VecDeque<u32>,
}

impl<E: Encode> PackedInstructionLoader<E> {
    pub fn new(
        samples: Vec<InstructionSample>,
        encoder: E,
        device: Device,
        seq_length: usize,
        batch_size: usize,
        eos_token_id: u32,
    ) -> Result<Self> {
        if seq_length == 0 {
            return Err(SftError::config("seq_length must be greater than zero"));
        }
        if batch_size == 0 {
            return Err(SftError::config("batch_size must be greater than zero"));
        }

        Ok(Self {
            samples,
            encoder,
            device,
            seq_length,
            batch_size,
            eos_token_id,
            next_sample: 0,
            token_buffer: VecDeque::with_capacity(seq_length * batch_size),
        })
    }

    pub fn seq_length(&self) -> usize {
        self.seq_length
    }

    /// Returns the next batch, or `None` once the samples are exhausted. The
    /// final batch may hold fewer than `batch_size` sequences.
    pub fn next_batch(&mut self) -> Result<Option<SftBatch>> {
        let mut sequences: Vec<Vec<u32>> = Vec::with_capacity(self.batch_size);
        while sequences.len() < self.batch_size {
            match self.next_sequence()? {
                Some(sequence) => sequences.push(sequence),
                None => break,
            }
        }

        if sequences.is_empty() {
            return Ok(None);
        }

        let rows = sequences.len();
        let mut flat: Vec<i64> = Vec::with_capacity(rows * self.seq_length);
        for sequence in &sequences {
            flat.extend(sequence.iter().map(|&token| token as i64));
        }

        let input_ids = Tensor::from_vec(flat, (rows, self.seq_length), &self.device)?;
        let labels = input_ids.clone();
        Ok(Some(SftBatch { input_ids, labels }))
    }

    fn next_sequence(&mut self) -> Result<Option<Vec<u32>>> {
        loop {
            if self.token_buffer.len() >= self.seq_length {
                let mut sequence = Vec::with_capacity(self.seq_length);
                for _ in 0..self.seq_length {
                    if let Some(token) = self.token_buffer.pop_front() {
                        sequence.push(token);
                    }
                }
                return Ok(Some(sequence));
            }

            if self.next_sample >= self.samples.len() {
                // Leftover tokens shorter than seq_length are dropped.
                return Ok(None);
            }

            let sample = &self.samples[self.next_sample];
            self.next_sample += 1;
            let text = prepare_sample_text(sample);
            let ids = self.encoder.encode(&text)?;
            self.token_buffer.extend(ids);
            self.token_buffer.push_back(self.eos_token_id);
        }
    }
}
