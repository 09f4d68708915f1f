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

//! Activation steering for decoder-only transformer models.
//!
//! A [`SteeringVector`] is a direction in a model's hidden-activation space,
//! bound to one transformer block. [`discovery`] derives one from
//! contrastive example texts; [`composition`] combines and analyzes sets of
//! them; [`model::SteeringModel`] attaches one or more to a loaded
//! transformer so that every forward pass through the targeted block adds
//! `alpha * vector` to its output hidden states.
//!
//! This crate owns none of: model loading, tokenizer construction, or
//! sampling strategy during generation — those are supplied by the host
//! through the [`model::TransformerModel`] and [`tokenizer::Tokenizer`]
//! traits.

pub mod block;
pub mod codec;
pub mod composition;
pub mod discovery;
pub mod dtype;
pub mod error;
pub mod model;
pub mod tokenizer;
pub mod vector;

pub use error::{Result, SteeringError};
pub use model::{ActiveSteering, GenerateInput, GenerateOutput, GenerationConfig, SteeringModel, TransformerModel};
pub use tokenizer::{HfTokenizer, Tokenizer};
pub use vector::SteeringVector;
