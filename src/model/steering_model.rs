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

//! [`SteeringModel`]: the stateful wrapper around a loaded transformer that
//! attaches, tracks and removes steering interceptors (spec.md §4.4).

use std::collections::HashMap;
use std::sync::Arc;

use tch::Tensor;

use crate::block::{BlockOutput, HookGuard, SteerableBlock, SteeringHookFn};
use crate::error::{Result, SteeringError};
use crate::model::registry;
use crate::model::{GenerationConfig, TransformerModel};
use crate::tokenizer::Tokenizer;
use crate::vector::SteeringVector;

/// Snapshot of one active interceptor, returned by
/// [`SteeringModel::list_active_steering`].
#[derive(Debug, Clone)]
pub struct ActiveSteering {
    pub layer: i64,
    pub alpha: f64,
    pub model_name: String,
    pub magnitude: f64,
    pub method: String,
}

/// A single string prompt, or a batch of them.
pub enum GenerateInput {
    Single(String),
    Batch(Vec<String>),
}

impl GenerateInput {
    fn texts(&self) -> Vec<String> {
        match self {
            GenerateInput::Single(s) => vec![s.clone()],
            GenerateInput::Batch(v) => v.clone(),
        }
    }

    fn wrap(&self, mut decoded: Vec<String>) -> GenerateOutput {
        match self {
            GenerateInput::Single(_) => GenerateOutput::Single(decoded.remove(0)),
            GenerateInput::Batch(_) => GenerateOutput::Batch(decoded),
        }
    }
}

/// The decoded output matching the shape of [`GenerateInput`].
#[derive(Debug, Clone)]
pub enum GenerateOutput {
    Single(String),
    Batch(Vec<String>),
}

struct ActiveEntry {
    alpha: f64,
    vector: SteeringVector,
    // Kept alive only for its Drop impl, which clears the block's hook.
    _guard: HookGuard,
}

/// Owns a loaded transformer, an optional tokenizer, and the set of
/// currently active per-layer interceptors. Per-instance state is
/// single-threaded with respect to the wrapped model's forward pass
/// (spec.md §5): mutating methods take `&mut self`.
pub struct SteeringModel<M: TransformerModel> {
    model: M,
    tokenizer: Option<Box<dyn Tokenizer>>,
    active: HashMap<i64, ActiveEntry>,
    block_cache: HashMap<usize, Arc<dyn SteerableBlock>>,
}

impl<M: TransformerModel> SteeringModel<M> {
    /// Wraps `model`. Fails with [`SteeringError::UnsupportedArchitecture`]
    /// if `model.model_type()` is not in the architecture registry.
    pub fn new(model: M, tokenizer: Option<Box<dyn Tokenizer>>) -> Result<Self> {
        registry::lookup(model.model_type())?;
        Ok(Self {
            model,
            tokenizer,
            active: HashMap::new(),
            block_cache: HashMap::new(),
        })
    }

    pub fn num_layers(&self) -> usize {
        self.model.num_layers()
    }

    pub fn hidden_size(&self) -> i64 {
        self.model.hidden_size()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    fn resolve_block(&mut self, layer: usize) -> Result<Arc<dyn SteerableBlock>> {
        if let Some(block) = self.block_cache.get(&layer) {
            return Ok(block.clone());
        }
        let block = self.model.block(layer)?;
        self.block_cache.insert(layer, block.clone());
        Ok(block)
    }

    /// Registers an interceptor on `vector.layer()` that adds `alpha * v`
    /// to that block's output hidden states on every forward pass.
    pub fn apply_steering(&mut self, vector: SteeringVector, alpha: f64) -> Result<()> {
        if !alpha.is_finite() {
            return Err(SteeringError::InvalidAlpha { value: alpha });
        }
        let layer = vector.layer();
        if layer < 0 || layer as usize >= self.model.num_layers() {
            return Err(SteeringError::InvalidLayer {
                layer,
                num_layers: self.model.num_layers(),
            });
        }
        if vector.dim() != self.model.hidden_size() {
            return Err(SteeringError::DimensionMismatch {
                expected: self.model.hidden_size(),
                actual: vector.dim(),
            });
        }
        if self.active.contains_key(&layer) {
            return Err(SteeringError::AlreadySteered { layer });
        }

        let block = self.resolve_block(layer as usize)?;
        let offset = vector.tensor().shallow_clone();
        let hook: SteeringHookFn = Arc::new(move |out: &BlockOutput| {
            let hidden = out.hidden_states();
            let v = offset.to_device(hidden.device()).to_kind(hidden.kind());
            out.with_hidden_states(hidden + v * alpha)
        });
        let guard = HookGuard::attach(block, hook);
        log::debug!("attached steering interceptor on layer {layer} with alpha={alpha}");

        self.active.insert(
            layer,
            ActiveEntry {
                alpha,
                vector,
                _guard: guard,
            },
        );
        Ok(())
    }

    /// Applies several vectors atomically: if any target layer is already
    /// steered, *no* interceptor is registered by the call (spec.md §8).
    pub fn apply_multiple_steering(
        &mut self,
        vectors: Vec<SteeringVector>,
        alphas: Option<Vec<f64>>,
    ) -> Result<()> {
        let alphas = alphas.unwrap_or_else(|| vec![1.0; vectors.len()]);
        if alphas.len() != vectors.len() {
            return Err(SteeringError::WeightCountMismatch {
                expected: vectors.len(),
                actual: alphas.len(),
            });
        }

        for vector in &vectors {
            let layer = vector.layer();
            if layer < 0 || layer as usize >= self.model.num_layers() {
                return Err(SteeringError::InvalidLayer {
                    layer,
                    num_layers: self.model.num_layers(),
                });
            }
            if vector.dim() != self.model.hidden_size() {
                return Err(SteeringError::DimensionMismatch {
                    expected: self.model.hidden_size(),
                    actual: vector.dim(),
                });
            }
            if self.active.contains_key(&layer) {
                return Err(SteeringError::AlreadySteered { layer });
            }
        }
        for alpha in &alphas {
            if !alpha.is_finite() {
                return Err(SteeringError::InvalidAlpha { value: *alpha });
            }
        }

        for (vector, alpha) in vectors.into_iter().zip(alphas) {
            self.apply_steering(vector, alpha)?;
        }
        Ok(())
    }

    /// Removes the interceptor on `layer`, or all of them if `layer` is
    /// `None`. Removing an already-idle layer is an intentional no-op.
    pub fn remove_steering(&mut self, layer: Option<i64>) {
        match layer {
            Some(l) => {
                if self.active.remove(&l).is_some() {
                    log::debug!("removed steering interceptor on layer {l}");
                }
            }
            None => {
                log::debug!("removing all {} active steering interceptor(s)", self.active.len());
                self.active.clear();
            }
        }
    }

    /// Snapshot of `{layer, alpha, origin model_name, magnitude, method}`
    /// for each active interceptor, ordered by layer.
    pub fn list_active_steering(&self) -> Vec<ActiveSteering> {
        let mut out: Vec<ActiveSteering> = self
            .active
            .values()
            .map(|entry| ActiveSteering {
                layer: entry.vector.layer(),
                alpha: entry.alpha,
                model_name: entry.vector.model_name().to_string(),
                magnitude: entry.vector.magnitude(),
                method: entry.vector.method().to_string(),
            })
            .collect();
        out.sort_by_key(|a| a.layer);
        out
    }

    /// Applies `vector` at `alpha`, runs the host's native generation
    /// routine, decodes the result, and removes the steering for
    /// `vector.layer()` before returning — whether generation succeeded or
    /// returned an error. Batch input returns batch output; a single prompt
    /// returns a single string.
    pub fn generate_with_steering(
        &mut self,
        input: GenerateInput,
        vector: SteeringVector,
        alpha: f64,
        cfg: &GenerationConfig,
    ) -> Result<GenerateOutput> {
        let layer = vector.layer();
        self.apply_steering(vector, alpha)?;

        let result = (|| -> Result<GenerateOutput> {
            let tokenizer = self.tokenizer.as_ref().ok_or_else(|| {
                SteeringError::Model("GenerateWithSteering requires a tokenizer".to_string())
            })?;
            let texts = input.texts();
            let encoded = tokenizer.encode_batch(&texts, cfg.max_length)?;
            let output_ids = self
                .model
                .generate(&encoded.input_ids, &encoded.attention_mask, cfg)?;
            let decoded = tokenizer.decode_batch(&output_ids)?;
            Ok(input.wrap(decoded))
        })();

        self.remove_steering(Some(layer));
        result
    }
}
