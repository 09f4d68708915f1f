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

//! Demo CLI: discovers a `mean_difference` vector against a toy in-memory
//! transformer, prints its magnitude, round-trips it through disk, and
//! lists active steering after applying it. There is no real pretrained
//! model here — this exercises the library end to end without network
//! access or model weights.

use std::path::PathBuf;
use std::sync::Arc;

use steering_rs::block::{BlockOutput, HookedBlock, RawBlockForward, SteerableBlock};
use steering_rs::discovery::{mean_difference, DiscoveryParams};
use steering_rs::model::{GenerationConfig, TransformerModel};
use steering_rs::{Result, SteeringModel, SteeringVector};
use tch::{Device, Kind, Tensor};

const HIDDEN: i64 = 8;
const NUM_LAYERS: usize = 4;

struct EchoBlock;
impl RawBlockForward for EchoBlock {
    fn raw_forward(&self, input: &BlockOutput) -> Result<BlockOutput> {
        Ok(input.clone())
    }
}

/// A toy transformer: every block is an identity function over a
/// deterministic per-token embedding, just large enough to demonstrate
/// discovery and the apply/generate lifecycle without any real weights.
struct ToyTransformer {
    blocks: Vec<Arc<HookedBlock<EchoBlock>>>,
}

impl ToyTransformer {
    fn new() -> Self {
        Self {
            blocks: (0..NUM_LAYERS).map(|_| Arc::new(HookedBlock::new(EchoBlock))).collect(),
        }
    }
}

impl TransformerModel for ToyTransformer {
    fn model_type(&self) -> &str {
        "llama"
    }
    fn hidden_size(&self) -> i64 {
        HIDDEN
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
            .expand([batch, seq_len, HIDDEN], false)
            .contiguous();
        let mut out = BlockOutput::Tensor(hidden);
        for block in &self.blocks {
            out = block.forward(&out)?;
        }
        Ok(())
    }
    fn generate(
        &self,
        input_ids: &Tensor,
        _attention_mask: &Tensor,
        _cfg: &GenerationConfig,
    ) -> Result<Tensor> {
        Ok(input_ids.shallow_clone())
    }
}

struct FixedTokenizer;
impl steering_rs::Tokenizer for FixedTokenizer {
    fn pad_token(&self) -> &str {
        "<pad>"
    }
    fn eos_token(&self) -> &str {
        "<eos>"
    }
    fn encode_batch(
        &self,
        texts: &[String],
        _max_length: usize,
    ) -> Result<steering_rs::tokenizer::EncodedBatch> {
        let ids: Vec<i64> = texts.iter().map(|t| t.len() as i64).collect();
        let batch = ids.len() as i64;
        Ok(steering_rs::tokenizer::EncodedBatch {
            input_ids: Tensor::from_slice(&ids).reshape([batch, 1]),
            attention_mask: Tensor::ones([batch, 1], (Kind::Int64, Device::Cpu)),
        })
    }
    fn decode_batch(&self, token_ids: &Tensor) -> Result<Vec<String>> {
        let batch = token_ids.size()[0];
        Ok((0..batch).map(|i| format!("generated-{i}")).collect())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let model = ToyTransformer::new();
    let tokenizer = FixedTokenizer;

    let positives = vec!["joyful".to_string(), "delighted".to_string()];
    let negatives = vec!["gloomy".to_string(), "miserable".to_string()];

    let params = DiscoveryParams::new(&model, &tokenizer, 1);
    let vector: SteeringVector = mean_difference(&params, &positives, &negatives)?;
    println!(
        "discovered vector at layer {} with magnitude {:.4}",
        vector.layer(),
        vector.magnitude()
    );

    let prefix = PathBuf::from(std::env::temp_dir()).join("steering-cli-demo");
    vector.save(&prefix)?;
    let reloaded = SteeringVector::load(&prefix)?;
    println!(
        "round-tripped through {:?}: magnitude now {:.4}",
        prefix,
        reloaded.magnitude()
    );

    let mut steering_model = SteeringModel::new(model, Some(Box::new(tokenizer)))?;
    steering_model.apply_steering(reloaded, 1.5)?;
    for active in steering_model.list_active_steering() {
        println!(
            "active: layer={} alpha={} method={} magnitude={:.4}",
            active.layer, active.alpha, active.method, active.magnitude
        );
    }
    steering_model.remove_steering(None);
    println!("active interceptors after cleanup: {}", steering_model.list_active_steering().len());

    Ok(())
}
