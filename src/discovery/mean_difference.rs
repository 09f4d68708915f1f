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

//! mean_difference (spec.md §4.2.1): `v = mean(A+) - mean(A-)`.

use serde_json::{json, Map};
use tch::Kind;

use crate::discovery::{extract_activations, DiscoveryParams};
use crate::error::{Result, SteeringError};
use crate::vector::SteeringVector;

pub fn mean_difference(
    params: &DiscoveryParams,
    positives: &[String],
    negatives: &[String],
) -> Result<SteeringVector> {
    if positives.is_empty() || negatives.is_empty() {
        return Err(SteeringError::EmptyExamples);
    }

    let pos = extract_activations(params, positives)?;
    let neg = extract_activations(params, negatives)?;

    let direction = (pos.mean_dim(0, false, Kind::Float) - neg.mean_dim(0, false, Kind::Float))
        .to_kind(Kind::Float);

    let mut metadata = Map::new();
    metadata.insert("num_positive".into(), json!(positives.len()));
    metadata.insert("num_negative".into(), json!(negatives.len()));

    SteeringVector::construct(
        direction,
        params.layer,
        format!("layer.{}", params.layer),
        params.model_name_or_default(),
        Some("mean_difference".to_string()),
        Some(metadata),
        None,
        None,
    )
}
