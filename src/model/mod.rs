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

//! The host-model contract and the [`SteeringModel`] runtime that attaches
//! steering vectors to it (spec.md §4.4).

pub mod registry;
mod steering_model;

pub use steering_model::{ActiveSteering, GenerateInput, GenerateOutput, SteeringModel};

use std::sync::Arc;

use tch::Tensor;

use crate::block::SteerableBlock;
use crate::error::Result;

/// Decoding parameters passed through to the host's native generation
/// routine, unopinionated about sampling strategy (that is the host's
/// responsibility per spec.md §1's Non-goals).
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub do_sample: bool,
    /// Prompt truncation length passed to the tokenizer before generation.
    pub max_length: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 32,
            temperature: 1.0,
            do_sample: false,
            max_length: 128,
        }
    }
}

/// The external contract a loaded transformer must satisfy to be steerable.
/// Model loading, tokenization and text generation internals are owned by
/// the host (spec.md §1, Non-goals); this crate only needs enough surface
/// to resolve a block by index and run it forward / generate from it.
pub trait TransformerModel: Send + Sync {
    /// `config.model_type` in spec.md §6 — gates the architecture registry.
    fn model_type(&self) -> &str;

    /// `config.hidden_size` in spec.md §6.
    fn hidden_size(&self) -> i64;

    /// Number of transformer blocks.
    fn num_layers(&self) -> usize;

    /// Resolves the block module at `index`. Implementations should cache
    /// the result themselves if resolution is expensive; `SteeringModel`
    /// additionally caches per instance (spec.md §4.4, "lazily-populated
    /// index -> block-module cache").
    fn block(&self, index: usize) -> Result<Arc<dyn SteerableBlock>>;

    /// Runs a forward pass for activation capture. No tensor is returned:
    /// capturing a block's output is a side effect of whatever hook is
    /// attached to it (see [`crate::block::HookedBlock`]), which mirrors
    /// the Python original's "a hook fires during this pass and records a
    /// detached copy" without this crate needing to know how an arbitrary
    /// architecture wires its own forward pass together.
    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<()>;

    /// Runs the host's native generation routine and returns the generated
    /// token ids (prompt + continuation), shape `[batch, seq_len]`.
    fn generate(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        cfg: &GenerationConfig,
    ) -> Result<Tensor>;
}
