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

//! The three dtypes a [`crate::SteeringVector`] may carry, per spec.md §6.

use serde::{Deserialize, Serialize};
use tch::Kind;

use crate::error::{Result, SteeringError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Float32,
    Float16,
    Bfloat16,
}

impl Dtype {
    pub fn from_kind(kind: Kind) -> Result<Self> {
        match kind {
            Kind::Float => Ok(Dtype::Float32),
            Kind::Half => Ok(Dtype::Float16),
            Kind::BFloat16 => Ok(Dtype::Bfloat16),
            other => Err(SteeringError::InvalidShape {
                shape: vec![other as i64],
            }),
        }
    }

    pub fn to_kind(self) -> Kind {
        match self {
            Dtype::Float32 => Kind::Float,
            Dtype::Float16 => Kind::Half,
            Dtype::Bfloat16 => Kind::BFloat16,
        }
    }

    /// The string used in the on-disk `{prefix}.json` record (spec.md §6).
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Dtype::Float32 => "float32",
            Dtype::Float16 => "float16",
            Dtype::Bfloat16 => "bfloat16",
        }
    }

    pub fn from_wire_str(s: &str) -> Result<Self> {
        match s {
            "float32" => Ok(Dtype::Float32),
            "float16" => Ok(Dtype::Float16),
            "bfloat16" => Ok(Dtype::Bfloat16),
            other => Err(SteeringError::SafeTensors(format!(
                "unknown dtype '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire_str())
    }
}
