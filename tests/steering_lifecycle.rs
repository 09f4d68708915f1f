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

//! End-to-end coverage against a hand-rolled mock transformer: discovery,
//! save/load, apply/list/remove, and generate-with-steering cleanup on both
//! success and failure paths (spec.md §8's seed scenarios).

use std::sync::Arc;

use steering_rs::block::{BlockOutput, HookedBlock, RawBlockForward, SteerableBlock};
use steering_rs::discovery::{caa, mean_difference, DiscoveryParams};
use steering_rs::model::{GenerationConfig, TransformerModel};
use steering_rs::tokenizer::EncodedBatch;
use steering_rs::{GenerateInput, Result, SteeringError, SteeringModel, SteeringVector, Tokenizer};
use tch::{Device, Kind, Tensor};

const HIDDEN: i64 = 6;
const NUM_LAYERS: usize = 4;

struct Passthrough;
impl RawBlockForward for Passthrough {
    fn raw_forward(&self, input: &BlockOutput) -> Result<BlockOutput> {
        Ok(input.clone())
    }
}

struct MockTransformer {
    blocks: Vec<Arc<HookedBlock<Passthrough>>>,
    fail_generate: bool,
}

impl MockTransformer {
    fn new() -> Self {
        Self {
            blocks: (0..NUM_LAYERS).map(|_| Arc::new(HookedBlock::new(Passthrough))).collect(),
            fail_generate: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail_generate: true,
            ..Self::new()
        }
    }
}

impl TransformerModel for MockTransformer {
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
        if self.fail_generate {
            Err(SteeringError::Model("mock backend intentionally failed".to_string()))
        } else {
            Ok(input_ids.shallow_clone())
        }
    }
}

struct ByteTokenizer;
impl Tokenizer for ByteTokenizer {
    fn pad_token(&self) -> &str {
        "<pad>"
    }
    fn eos_token(&self) -> &str {
        "<eos>"
    }
    fn encode_batch(&self, texts: &[String], _max_length: usize) -> Result<EncodedBatch> {
        let ids: Vec<i64> = texts.iter().map(|t| t.bytes().next().unwrap_or(0) as i64).collect();
        let batch = ids.len() as i64;
        Ok(EncodedBatch {
            input_ids: Tensor::from_slice(&ids).reshape([batch, 1]),
            attention_mask: Tensor::ones([batch, 1], (Kind::Int64, Device::Cpu)),
        })
    }
    fn decode_batch(&self, token_ids: &Tensor) -> Result<Vec<String>> {
        let batch = token_ids.size()[0];
        Ok((0..batch).map(|i| format!("out-{i}")).collect())
    }
}

#[test]
fn discovered_vector_round_trips_through_disk() {
    let model = MockTransformer::new();
    let tokenizer = ByteTokenizer;
    let params = DiscoveryParams::new(&model, &tokenizer, 2);

    let vector = mean_difference(
        &params,
        &["a".to_string(), "b".to_string()],
        &["c".to_string(), "d".to_string()],
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("discovered");
    vector.save(&prefix).unwrap();
    let loaded = SteeringVector::load(&prefix).unwrap();

    assert_eq!(loaded.layer(), vector.layer());
    assert_eq!(Vec::<f32>::from(loaded.tensor()), Vec::<f32>::from(vector.tensor()));
    assert!((loaded.magnitude() - vector.magnitude()).abs() < 1e-6);
}

#[test]
fn caa_requires_matched_pair_counts() {
    let model = MockTransformer::new();
    let tokenizer = ByteTokenizer;
    let params = DiscoveryParams::new(&model, &tokenizer, 0);
    let err = caa(&params, &["a".to_string()], &["b".to_string(), "c".to_string()], None)
        .unwrap_err();
    assert!(matches!(err, SteeringError::SizeMismatch { .. }));
}

fn unit_vector(layer: i64) -> SteeringVector {
    SteeringVector::construct(
        Tensor::zeros([HIDDEN], (Kind::Float, Device::Cpu)) + 1.0,
        layer,
        "model.layers",
        "mock",
        Some("mean_difference".to_string()),
        None,
        None,
        None,
    )
    .unwrap()
}

#[test]
fn apply_multiple_then_remove_all_drains_active_list() {
    let model = MockTransformer::new();
    let mut steering_model = SteeringModel::new(model, None).unwrap();

    steering_model
        .apply_multiple_steering(vec![unit_vector(0), unit_vector(1), unit_vector(2)], None)
        .unwrap();
    assert_eq!(steering_model.list_active_steering().len(), 3);

    steering_model.remove_steering(None);
    assert!(steering_model.list_active_steering().is_empty());
}

#[test]
fn apply_multiple_steering_is_atomic_on_conflict() {
    let model = MockTransformer::new();
    let mut steering_model = SteeringModel::new(model, None).unwrap();

    steering_model.apply_steering(unit_vector(1), 1.0).unwrap();
    let err = steering_model
        .apply_multiple_steering(vec![unit_vector(0), unit_vector(1)], None)
        .unwrap_err();
    assert!(matches!(err, SteeringError::AlreadySteered { layer: 1 }));
    // layer 0 must not have been left active by the aborted call.
    assert_eq!(steering_model.list_active_steering().len(), 1);
}

#[test]
fn generate_with_steering_cleans_up_after_success() {
    let model = MockTransformer::new();
    let mut steering_model =
        SteeringModel::new(model, Some(Box::new(ByteTokenizer))).unwrap();

    let output = steering_model
        .generate_with_steering(
            GenerateInput::Single("hi".to_string()),
            unit_vector(0),
            2.0,
            &GenerationConfig::default(),
        )
        .unwrap();
    let _ = output;
    assert!(steering_model.list_active_steering().is_empty());
}

#[test]
fn generate_with_steering_cleans_up_after_failure() {
    let model = MockTransformer::failing();
    let mut steering_model =
        SteeringModel::new(model, Some(Box::new(ByteTokenizer))).unwrap();

    let err = steering_model
        .generate_with_steering(
            GenerateInput::Single("hi".to_string()),
            unit_vector(0),
            2.0,
            &GenerationConfig::default(),
        )
        .unwrap_err();
    assert!(matches!(err, SteeringError::Model(_)));
    assert!(steering_model.list_active_steering().is_empty());
}
