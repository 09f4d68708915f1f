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

//! Error taxonomy for the steering core.
//!
//! Every variant carries the offending values (requested layer vs.
//! `num_layers`, vector dimension vs. model `hidden_size`, ...) so a caller
//! can build an actionable message without inspecting internals. No error
//! is swallowed; the only intentional no-op is `RemoveSteering` on a layer
//! that is already idle.

use std::path::PathBuf;

/// Errors raised by the steering-vector data model, discovery, composition
/// and runtime components.
#[derive(Debug, thiserror::Error)]
pub enum SteeringError {
    #[error("tensor is not rank-1 (shape: {shape:?})")]
    InvalidShape { shape: Vec<i64> },

    #[error("layer {layer} is invalid (must be in [0, {num_layers}))")]
    InvalidLayer { layer: i64, num_layers: usize },

    #[error("alpha must be a finite number, got {value}")]
    InvalidAlpha { value: f64 },

    #[error("magnitude {recorded} does not match ||tensor||_2 = {computed} (tolerance 1e-3)")]
    MagnitudeMismatch { recorded: f64, computed: f64 },

    #[error("expected dimension {expected}, got {actual}")]
    DimensionMismatch { expected: i64, actual: i64 },

    #[error("tensor contains NaN or +/-infinity")]
    NonFinite,

    #[error("positive or negative example list is empty")]
    EmptyExamples,

    #[error("CAA requires |positives| == |negatives|, got {positives} and {negatives}")]
    SizeMismatch { positives: usize, negatives: usize },

    #[error("layer {layer} already has an active steering interceptor")]
    AlreadySteered { layer: i64 },

    #[error("vectors are incompatible for composition: {reason}")]
    Incompatible { reason: String },

    #[error("expected {expected} weights for {expected} vectors, got {actual}")]
    WeightCountMismatch { expected: usize, actual: usize },

    #[error("no vectors supplied")]
    Empty,

    #[error("model type '{model_type}' is not registered; known types: {known:?}")]
    UnsupportedArchitecture {
        model_type: String,
        known: Vec<String>,
    },

    #[error("parent module '{parent_path}' not found while resolving layer {layer}")]
    ParentNotFound { parent_path: String, layer: usize },

    #[error("layers attribute '{layers_attr}' missing on parent '{parent_path}'")]
    LayersAttrMissing {
        parent_path: String,
        layers_attr: String,
    },

    #[error("no activation was captured on block {layer}; the forward hook never fired")]
    NoActivationCaptured { layer: i64 },

    #[error("linear probe training failed to converge: {reason}")]
    TrainingFailed { reason: String },

    #[error("shape mismatch loading '{path}': header declares {declared:?}, buffer has {numel} elements")]
    ShapeMismatch {
        path: PathBuf,
        declared: Vec<i64>,
        numel: usize,
    },

    #[error("vector file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("host model error: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("safetensors error: {0}")]
    SafeTensors(String),
}

pub type Result<T> = std::result::Result<T, SteeringError>;
