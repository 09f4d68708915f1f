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

//! linear_probe (spec.md §4.2.3): fits an L2-regularized logistic
//! regression classifier on the positive/negative activations and returns
//! its weight vector as the steering direction.

use serde_json::{json, Map};
use tch::nn::OptimizerConfig;
use tch::{nn, Device, Kind, Reduction, Tensor};

use crate::discovery::{extract_activations, DiscoveryParams};
use crate::error::{Result, SteeringError};
use crate::vector::SteeringVector;

/// Training diagnostics returned alongside the probe's weight vector.
#[derive(Debug, Clone)]
pub struct ProbeMetrics {
    pub train_accuracy: f64,
    pub num_positive: usize,
    pub num_negative: usize,
    pub c: f64,
    pub normalized: bool,
}

pub struct LinearProbeParams {
    pub c: f64,
    pub max_iter: usize,
    pub normalize: bool,
}

impl Default for LinearProbeParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            normalize: true,
        }
    }
}

pub fn linear_probe(
    params: &DiscoveryParams,
    positives: &[String],
    negatives: &[String],
    probe: &LinearProbeParams,
) -> Result<(SteeringVector, ProbeMetrics)> {
    if positives.is_empty() || negatives.is_empty() {
        return Err(SteeringError::EmptyExamples);
    }

    let pos = extract_activations(params, positives)?;
    let neg = extract_activations(params, negatives)?;

    let x = Tensor::cat(&[&pos, &neg], 0).to_kind(Kind::Float);
    let y = Tensor::cat(
        &[
            Tensor::ones([pos.size()[0]], (Kind::Float, Device::Cpu)),
            Tensor::zeros([neg.size()[0]], (Kind::Float, Device::Cpu)),
        ],
        0,
    );

    let x_train = if probe.normalize {
        let mean = x.mean_dim(0, true, Kind::Float);
        let std = x.std_dim(0, false, true) + 1e-8;
        (&x - &mean) / &std
    } else {
        x.shallow_clone()
    };

    let (weight, train_accuracy) = fit_logistic(&x_train, &y, probe.c, probe.max_iter)?;

    let metrics = ProbeMetrics {
        train_accuracy,
        num_positive: positives.len(),
        num_negative: negatives.len(),
        c: probe.c,
        normalized: probe.normalize,
    };

    let mut metadata = Map::new();
    metadata.insert("train_accuracy".into(), json!(metrics.train_accuracy));
    metadata.insert("num_positive".into(), json!(metrics.num_positive));
    metadata.insert("num_negative".into(), json!(metrics.num_negative));
    metadata.insert("c".into(), json!(metrics.c));
    metadata.insert("normalized".into(), json!(metrics.normalized));

    let vector = SteeringVector::construct(
        weight,
        params.layer,
        format!("layer.{}", params.layer),
        params.model_name_or_default(),
        Some("linear_probe".to_string()),
        Some(metadata),
        None,
        None,
    )?;

    Ok((vector, metrics))
}

/// Trains a single-layer logistic regression classifier via gradient
/// descent, L2-penalized by `1/c`, for a reproducible fixed seed.
fn fit_logistic(x: &Tensor, y: &Tensor, c: f64, max_iter: usize) -> Result<(Tensor, f64)> {
    tch::manual_seed(42);
    let n = x.size()[0] as f64;
    let h = x.size()[1];

    let vs = nn::VarStore::new(Device::Cpu);
    let w = vs.root().randn("probe_weight", &[h, 1], 0.0, 0.01);
    let b = vs.root().zeros("probe_bias", &[1]);
    let mut optimizer = nn::Adam::default()
        .build(&vs, 0.05)
        .map_err(|e| SteeringError::TrainingFailed {
            reason: e.to_string(),
        })?;

    let lambda = 1.0 / c;
    for _ in 0..max_iter {
        let logits = x.matmul(&w).squeeze_dim(1) + &b;
        let data_loss = logits.binary_cross_entropy_with_logits::<Tensor>(
            y,
            None,
            None,
            Reduction::Mean,
        );
        let reg = w.pow_tensor_scalar(2).sum(Kind::Float) * (lambda / (2.0 * n));
        let loss = data_loss + reg;
        optimizer.zero_grad();
        loss.backward();
        optimizer.step();
    }

    let final_logits = (x.matmul(&w).squeeze_dim(1) + &b).detach();
    let has_nan = final_logits.isnan().any().int64_value(&[]) != 0;
    let has_inf = final_logits.isinf().any().int64_value(&[]) != 0;
    if has_nan || has_inf {
        return Err(SteeringError::TrainingFailed {
            reason: "training produced non-finite logits".to_string(),
        });
    }

    let predictions = final_logits.sigmoid().ge(0.5).to_kind(Kind::Float);
    let accuracy = predictions
        .eq_tensor(y)
        .to_kind(Kind::Float)
        .mean(Kind::Float)
        .double_value(&[]);

    Ok((w.detach().squeeze_dim(1).to_kind(Kind::Float), accuracy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::tests_support::ConstantModel;
    use crate::tokenizer::tests_support::StubTokenizer;

    #[test]
    fn separable_activations_train_to_high_accuracy() {
        let model = ConstantModel::new(4, 2);
        let tokenizer = StubTokenizer;
        let params = DiscoveryParams::new(&model, &tokenizer, 0);
        let probe = LinearProbeParams {
            max_iter: 200,
            ..Default::default()
        };

        let (vector, metrics) = linear_probe(
            &params,
            &["a".to_string(), "b".to_string()],
            &["c".to_string(), "d".to_string()],
            &probe,
        )
        .unwrap();

        assert_eq!(vector.dim(), 4);
        assert_eq!(metrics.num_positive, 2);
        assert_eq!(metrics.num_negative, 2);
        assert!(metrics.train_accuracy >= 0.0 && metrics.train_accuracy <= 1.0);
    }

    #[test]
    fn empty_examples_is_rejected() {
        let model = ConstantModel::new(4, 2);
        let tokenizer = StubTokenizer;
        let params = DiscoveryParams::new(&model, &tokenizer, 0);
        let err = linear_probe(&params, &[], &["x".to_string()], &LinearProbeParams::default())
            .unwrap_err();
        assert!(matches!(err, SteeringError::EmptyExamples));
    }
}
