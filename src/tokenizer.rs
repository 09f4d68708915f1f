// Copyright 2024 The steering-rs Authors.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The tokenizer contract. Discovery's example-encoding step and
//! [`crate::model::SteeringModel::generate_with_steering`] both need to turn
//! text into padded, batched tensors and back; this crate owns neither a
//! vocabulary nor a BPE merge table, so it depends on this trait the same
//! way it depends on [`crate::model::TransformerModel`] for the model
//! itself (spec.md §1, Non-goals).

use tch::{Device, Kind, Tensor};
use tokenizers::Tokenizer as HfTokenizerImpl;

use crate::error::{Result, SteeringError};

/// Right-padded `input_ids` / `attention_mask`, shape `[batch, seq_len]`.
#[derive(Debug)]
pub struct EncodedBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
}

/// The text <-> token-id contract a host tokenizer must satisfy.
pub trait Tokenizer: Send + Sync {
    fn pad_token(&self) -> &str;
    fn eos_token(&self) -> &str;

    /// Encodes `texts`, right-padding to the longest sequence (capped at
    /// `max_length`).
    fn encode_batch(&self, texts: &[String], max_length: usize) -> Result<EncodedBatch>;

    /// Decodes `token_ids` (shape `[batch, seq_len]`) back to text, one
    /// string per row.
    fn decode_batch(&self, token_ids: &Tensor) -> Result<Vec<String>>;
}

/// Default [`Tokenizer`] implementation backed by Hugging Face's
/// `tokenizers` crate.
pub struct HfTokenizer {
    inner: HfTokenizerImpl,
    pad_token: String,
    eos_token: String,
    pad_id: u32,
}

impl HfTokenizer {
    /// Loads a `tokenizer.json` file as produced by the `tokenizers`
    /// library or the Hugging Face Hub.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let inner = HfTokenizerImpl::from_file(path.as_ref())
            .map_err(|e| SteeringError::Tokenizer(e.to_string()))?;
        let pad_token = "<pad>".to_string();
        let eos_token = "<eos>".to_string();
        let pad_id = inner
            .token_to_id(&pad_token)
            .or_else(|| inner.token_to_id(&eos_token))
            .unwrap_or(0);
        Ok(Self {
            inner,
            pad_token,
            eos_token,
            pad_id,
        })
    }
}

impl Tokenizer for HfTokenizer {
    fn pad_token(&self) -> &str {
        &self.pad_token
    }

    fn eos_token(&self) -> &str {
        &self.eos_token
    }

    fn encode_batch(&self, texts: &[String], max_length: usize) -> Result<EncodedBatch> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| SteeringError::Tokenizer(e.to_string()))?;

        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(max_length.max(1));

        let batch = encodings.len() as i64;
        let mut ids_flat = vec![self.pad_id as i64; batch as usize * seq_len];
        let mut mask_flat = vec![0i64; batch as usize * seq_len];

        for (row, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let n = ids.len().min(seq_len);
            for col in 0..n {
                ids_flat[row * seq_len + col] = ids[col] as i64;
                mask_flat[row * seq_len + col] = 1;
            }
        }

        Ok(EncodedBatch {
            input_ids: Tensor::from_slice(&ids_flat).reshape([batch, seq_len as i64]),
            attention_mask: Tensor::from_slice(&mask_flat)
                .reshape([batch, seq_len as i64])
                .to_kind(Kind::Int64),
        })
    }

    fn decode_batch(&self, token_ids: &Tensor) -> Result<Vec<String>> {
        let token_ids = token_ids.to_device(Device::Cpu);
        let batch = token_ids.size()[0];
        let mut out = Vec::with_capacity(batch as usize);
        for row in 0..batch {
            let ids: Vec<i64> = Vec::from(token_ids.get(row));
            let ids: Vec<u32> = ids.into_iter().map(|id| id as u32).collect();
            let text = self
                .inner
                .decode(&ids, true)
                .map_err(|e| SteeringError::Tokenizer(e.to_string()))?;
            out.push(text);
        }
        Ok(out)
    }
}
