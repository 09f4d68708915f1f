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

//! Process-wide architecture registry (spec.md §4.4, §9).
//!
//! Maps a model-type identifier to the attribute path the Python original
//! would walk to find a model's transformer blocks. Rust cannot reflect
//! into an arbitrary host struct by string path, so `ArchSpec` is carried
//! as diagnostic metadata on [`crate::SteeringError::UnsupportedArchitecture`]
//! and [`crate::SteeringError::ParentNotFound`]; the actual block lookup is
//! delegated to the host's [`crate::model::TransformerModel::block`], which
//! registration here gates.
//!
//! Registration is a simple write-on-register discipline: concurrent
//! registration is initialization-time activity, not a design concern
//! (spec.md §9).

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::error::{Result, SteeringError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchSpec {
    pub parent_path: String,
    pub layers_attr: String,
}

static REGISTRY: Lazy<RwLock<HashMap<String, ArchSpec>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let transformer_layers = [
        "llama", "mistral", "gemma", "gemma2", "phi", "phi3", "qwen2", "qwen2_moe",
    ];
    for name in transformer_layers {
        m.insert(
            name.to_string(),
            ArchSpec {
                parent_path: "model".to_string(),
                layers_attr: "layers".to_string(),
            },
        );
    }
    for name in ["gpt2", "gpt_neo", "gptj", "bloom", "falcon"] {
        m.insert(
            name.to_string(),
            ArchSpec {
                parent_path: "transformer".to_string(),
                layers_attr: "h".to_string(),
            },
        );
    }
    m.insert(
        "gpt_neox".to_string(),
        ArchSpec {
            parent_path: "gpt_neox".to_string(),
            layers_attr: "layers".to_string(),
        },
    );
    m.insert(
        "opt".to_string(),
        ArchSpec {
            parent_path: "model.decoder".to_string(),
            layers_attr: "layers".to_string(),
        },
    );
    RwLock::new(m)
});

/// Adds or overwrites an entry in the process-wide registry.
pub fn register_architecture(model_type: &str, parent_path: &str, layers_attr: &str) {
    REGISTRY.write().expect("registry lock poisoned").insert(
        model_type.to_string(),
        ArchSpec {
            parent_path: parent_path.to_string(),
            layers_attr: layers_attr.to_string(),
        },
    );
}

/// Looks up `model_type`, failing with [`SteeringError::UnsupportedArchitecture`]
/// (listing the known keys) if it was never registered.
pub fn lookup(model_type: &str) -> Result<ArchSpec> {
    let registry = REGISTRY.read().expect("registry lock poisoned");
    registry
        .get(model_type)
        .cloned()
        .ok_or_else(|| SteeringError::UnsupportedArchitecture {
            model_type: model_type.to_string(),
            known: {
                let mut keys: Vec<String> = registry.keys().cloned().collect();
                keys.sort();
                keys
            },
        })
}
