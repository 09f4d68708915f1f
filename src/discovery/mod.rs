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

//! Discovery: derive a [`crate::vector::SteeringVector`] from contrastive
//! example texts by running the model forward and harvesting activations
//! (spec.md §4.2).

mod caa;
mod linear_probe;
mod mean_difference;

pub use caa::caa;
pub use linear_probe::{linear_probe, LinearProbeParams, ProbeMetrics};
pub use mean_difference::mean_difference;

use std::sync::{Arc, Mutex};

use tch::{Device, Kind, Tensor};

use crate::block::{BlockOutput, HookGuard, SteeringHookFn};
use crate::error::{Result, SteeringError};
use crate::model::TransformerModel;
use crate::tokenizer::Tokenizer;

/// Shared input signature every discovery algorithm accepts (spec.md §4.2).
pub struct DiscoveryParams<'a> {
    pub layer: i64,
    pub model: &'a dyn TransformerModel,
    pub tokenizer: &'a dyn Tokenizer,
    pub model_name: Option<String>,
    pub batch_size: usize,
    pub max_length: usize,
    pub device: Option<Device>,
}

impl<'a> DiscoveryParams<'a> {
    pub fn new(model: &'a dyn TransformerModel, tokenizer: &'a dyn Tokenizer, layer: i64) -> Self {
        Self {
            layer,
            model,
            tokenizer,
            model_name: None,
            batch_size: 8,
            max_length: 128,
            device: None,
        }
    }

    fn check_layer(&self) -> Result<()> {
        if self.layer < 0 || self.layer as usize >= self.model.num_layers() {
            return Err(SteeringError::InvalidLayer {
                layer: self.layer,
                num_layers: self.model.num_layers(),
            });
        }
        Ok(())
    }

    fn model_name_or_default(&self) -> String {
        self.model_name
            .clone()
            .unwrap_or_else(|| self.model.model_type().to_string())
    }
}

/// Runs forward passes over `texts` in chunks of `batch_size`, capturing
/// block `layer`'s output averaged over the sequence axis, shape `[B, H]`
/// per chunk. Concatenates to `[texts.len(), H]` (spec.md §4.2, "Activation
/// extraction subroutine").
pub(crate) fn extract_activations(
    params: &DiscoveryParams,
    texts: &[String],
) -> Result<Tensor> {
    if texts.is_empty() {
        return Err(SteeringError::EmptyExamples);
    }
    params.check_layer()?;

    log::trace!("extracting activations for {} texts at layer {}", texts.len(), params.layer);
    let block = params.model.block(params.layer as usize)?;
    let captured: Arc<Mutex<Vec<Tensor>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = captured.clone();
    let hook: SteeringHookFn = Arc::new(move |out: &BlockOutput| {
        let pooled = out.hidden_states().mean_dim(1, false, Kind::Float).detach();
        sink.lock().expect("capture lock poisoned").push(pooled);
        out.clone()
    });
    let guard = HookGuard::attach(block, hook);

    let mut chunks = Vec::new();
    for slice in texts.chunks(params.batch_size.max(1)) {
        let encoded = params.tokenizer.encode_batch(slice, params.max_length)?;
        let device = params.device.unwrap_or(Device::Cpu);
        let input_ids = encoded.input_ids.to_device(device);
        let attention_mask = encoded.attention_mask.to_device(device);

        let before = captured.lock().expect("capture lock poisoned").len();
        tch::no_grad(|| params.model.forward(&input_ids, &attention_mask))?;
        let after = captured.lock().expect("capture lock poisoned").len();
        if after == before {
            drop(guard);
            return Err(SteeringError::NoActivationCaptured { layer: params.layer });
        }
    }
    drop(guard);

    let mut all = captured.lock().expect("capture lock poisoned");
    for chunk in all.drain(..) {
        chunks.push(chunk);
    }
    Ok(Tensor::cat(&chunks, 0))
}

/// Test double shared by the three algorithm modules' unit tests: a model
/// whose block output is the input token id broadcast across the hidden
/// dimension, so [`crate::tokenizer::tests_support::StubTokenizer`]'s
/// per-text token id deterministically drives the captured activation.
#[cfg(test)]
pub(crate) mod tests_support {
    use std::sync::Arc;

    use tch::{Device, Kind, Tensor};

    use crate::block::{BlockOutput, HookedBlock, RawBlockForward, SteerableBlock};
    use crate::error::Result;
    use crate::model::{GenerationConfig, TransformerModel};

    struct Passthrough;
    impl RawBlockForward for Passthrough {
        fn raw_forward(&self, input: &BlockOutput) -> Result<BlockOutput> {
            Ok(input.clone())
        }
    }

    pub struct ConstantModel {
        hidden: i64,
        blocks: Vec<Arc<HookedBlock<Passthrough>>>,
    }

    impl ConstantModel {
        pub fn new(hidden: i64, num_layers: usize) -> Self {
            Self {
                hidden,
                blocks: (0..num_layers).map(|_| Arc::new(HookedBlock::new(Passthrough))).collect(),
            }
        }
    }

    impl TransformerModel for ConstantModel {
        fn model_type(&self) -> &str {
            "constant-mock"
        }
        fn hidden_size(&self) -> i64 {
            self.hidden
        }
        fn num_layers(&self) -> usize {
            self.blocks.len()
        }
        fn block(&self, index: usize) -> Result<Arc<dyn SteerableBlock>> {
            Ok(self.blocks[index].clone() as Arc<dyn SteerableBlock>)
        }
        fn forward(&self, input_ids: &Tensor, _attention_mask: &Tensor) -> Result<()> {
            let batch = input_ids.size()[0];
            let seq_len = input_ids.size()[1];
            let hidden = input_ids
                .to_kind(Kind::Float)
                .unsqueeze(-1)
                .expand([batch, seq_len, self.hidden], false)
                .contiguous();
            let out = BlockOutput::Tensor(hidden);
            for block in &self.blocks {
                block.forward(&out)?;
            }
            Ok(())
        }
        fn generate(
            &self,
            _input_ids: &Tensor,
            _attention_mask: &Tensor,
            _cfg: &GenerationConfig,
        ) -> Result<Tensor> {
            Ok(Tensor::zeros([1, 1], (Kind::Int64, Device::Cpu)))
        }
    }
}
