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

//! Contrastive activation addition (spec.md §4.2.2): pairs positives and
//! negatives by index and averages the per-pair contrast, rather than
//! differencing the two aggregate means.

use serde_json::{json, Map};
use tch::Kind;

use crate::discovery::{extract_activations, DiscoveryParams};
use crate::error::{Result, SteeringError};
use crate::vector::SteeringVector;

pub fn caa(
    params: &DiscoveryParams,
    positives: &[String],
    negatives: &[String],
    num_pairs: Option<usize>,
) -> Result<SteeringVector> {
    if positives.is_empty() || negatives.is_empty() {
        return Err(SteeringError::EmptyExamples);
    }
    if positives.len() != negatives.len() {
        return Err(SteeringError::SizeMismatch {
            positives: positives.len(),
            negatives: negatives.len(),
        });
    }

    let n = num_pairs.unwrap_or(positives.len()).min(positives.len());
    let positives = &positives[..n];
    let negatives = &negatives[..n];

    let pos = extract_activations(params, positives)?;
    let neg = extract_activations(params, negatives)?;

    let contrasts = (pos - neg).to_kind(Kind::Float);
    let direction = contrasts.mean_dim(0, false, Kind::Float);

    let mut metadata = Map::new();
    metadata.insert("num_pairs".into(), json!(n));

    SteeringVector::construct(
        direction,
        params.layer,
        format!("layer.{}", params.layer),
        params.model_name_or_default(),
        Some("caa".to_string()),
        Some(metadata),
        None,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::tests_support::ConstantModel;
    use crate::tokenizer::tests_support::StubTokenizer;

    #[test]
    fn pairwise_contrast_matches_mean_of_differences() {
        let model = ConstantModel::new(4, 3);
        let tokenizer = StubTokenizer;
        let params = DiscoveryParams::new(&model, &tokenizer, 0);

        let v = caa(
            &params,
            &["a".to_string(), "b".to_string()],
            &["c".to_string(), "d".to_string()],
            None,
        )
        .unwrap();

        // 'a'=97,'c'=99 -> -2 ; 'b'=98,'d'=100 -> -2 ; mean = -2
        let values: Vec<f32> = Vec::from(v.tensor());
        for value in values {
            assert!((value - (-2.0)).abs() < 1e-4);
        }
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let model = ConstantModel::new(4, 3);
        let tokenizer = StubTokenizer;
        let params = DiscoveryParams::new(&model, &tokenizer, 0);
        let err = caa(&params, &["a".to_string()], &["c".to_string(), "d".to_string()], None)
            .unwrap_err();
        assert!(matches!(err, SteeringError::SizeMismatch { .. }));
    }

    #[test]
    fn num_pairs_truncates_both_lists() {
        let model = ConstantModel::new(4, 3);
        let tokenizer = StubTokenizer;
        let params = DiscoveryParams::new(&model, &tokenizer, 0);
        let v = caa(
            &params,
            &["a".to_string(), "b".to_string()],
            &["c".to_string(), "d".to_string()],
            Some(1),
        )
        .unwrap();
        assert_eq!(v.metadata().get("num_pairs").unwrap(), &serde_json::json!(1));
    }
}
