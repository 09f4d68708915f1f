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

//! # SteeringVector
//!
//! The single persistent artifact of the steering core: a 1-D tensor of
//! length `H` (the model's hidden size) bound to a transformer block index
//! and an origin model, plus enough metadata to reproduce how it was
//! discovered. See spec.md §3/§4.1.
//!
//! A `SteeringVector` is never mutated in place after construction — every
//! transformation (`ToDevice`, composition) produces a new value.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tch::{Device, Tensor};

use crate::codec;
use crate::dtype::Dtype;
use crate::error::{Result, SteeringError};

const FORMAT_VERSION: &str = "1.0.0";

/// A 1-D steering direction bound to a specific transformer block.
///
/// # Invariants
///
/// * `tensor` is always rank-1.
/// * `magnitude >= 0`, and equals `||tensor||_2` within `1e-3` (checked by
///   [`SteeringVector::validate`], not re-derived on every access).
/// * Two vectors are compatible for composition iff they share shape and
///   `layer`.
pub struct SteeringVector {
    tensor: Tensor,
    layer: i64,
    layer_name: String,
    model_name: String,
    method: String,
    magnitude: f64,
    metadata: Map<String, Value>,
    created_at: DateTime<Utc>,
}

impl Clone for SteeringVector {
    fn clone(&self) -> Self {
        Self {
            tensor: self.tensor.shallow_clone(),
            layer: self.layer,
            layer_name: self.layer_name.clone(),
            model_name: self.model_name.clone(),
            method: self.method.clone(),
            magnitude: self.magnitude,
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for SteeringVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteeringVector")
            .field("layer", &self.layer)
            .field("layer_name", &self.layer_name)
            .field("model_name", &self.model_name)
            .field("method", &self.method)
            .field("magnitude", &self.magnitude)
            .field("shape", &self.tensor.size())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct VectorRecord {
    version: String,
    model_name: String,
    layer: i64,
    layer_name: String,
    method: String,
    magnitude: f64,
    shape: Vec<i64>,
    dtype: String,
    created_at: DateTime<Utc>,
    metadata: Map<String, Value>,
}

impl SteeringVector {
    /// Build and validate a new vector.
    ///
    /// Fails with [`SteeringError::InvalidShape`] if `tensor` is not rank-1
    /// or has an unsupported dtype, or [`SteeringError::InvalidLayer`] if
    /// `layer` is negative. `magnitude` is recomputed as `||tensor||_2` when
    /// not supplied; `created_at` defaults to the current UTC instant.
    #[allow(clippy::too_many_arguments)]
    pub fn construct(
        tensor: Tensor,
        layer: i64,
        layer_name: impl Into<String>,
        model_name: impl Into<String>,
        method: Option<String>,
        metadata: Option<Map<String, Value>>,
        magnitude: Option<f64>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        if tensor.dim() != 1 {
            return Err(SteeringError::InvalidShape {
                shape: tensor.size(),
            });
        }
        // Validates the dtype is one of the three supported kinds.
        Dtype::from_kind(tensor.kind())?;
        if layer < 0 {
            return Err(SteeringError::InvalidLayer {
                layer,
                num_layers: 0,
            });
        }

        let magnitude = match magnitude {
            Some(m) => m,
            None => tensor.to_kind(tch::Kind::Double).norm().double_value(&[]),
        };

        Ok(Self {
            tensor,
            layer,
            layer_name: layer_name.into(),
            model_name: model_name.into(),
            method: method.unwrap_or_else(|| "unknown".to_string()),
            magnitude,
            metadata: metadata.unwrap_or_default(),
            created_at: created_at.unwrap_or_else(Utc::now),
        })
    }

    /// Re-checks integrity: magnitude consistency (`1e-3` tolerance),
    /// optional expected-dimension match, and absence of NaN/±∞.
    pub fn validate(&self, expected_dim: Option<i64>) -> Result<()> {
        let computed = self.tensor.to_kind(tch::Kind::Double).norm().double_value(&[]);
        if (computed - self.magnitude).abs() > 1e-3 {
            return Err(SteeringError::MagnitudeMismatch {
                recorded: self.magnitude,
                computed,
            });
        }

        if let Some(expected) = expected_dim {
            let actual = self.tensor.size()[0];
            if actual != expected {
                return Err(SteeringError::DimensionMismatch { expected, actual });
            }
        }

        let has_nan = self.tensor.isnan().any().int64_value(&[]) != 0;
        let has_inf = self.tensor.isinf().any().int64_value(&[]) != 0;
        if has_nan || has_inf {
            return Err(SteeringError::NonFinite);
        }

        Ok(())
    }

    /// Returns a new vector whose tensor lives on `target`. All metadata is
    /// preserved; the magnitude is unchanged since a device transfer does
    /// not alter values.
    pub fn to_device(&self, target: Device) -> Self {
        Self {
            tensor: self.tensor.to_device(target),
            layer: self.layer,
            layer_name: self.layer_name.clone(),
            model_name: self.model_name.clone(),
            method: self.method.clone(),
            magnitude: self.magnitude,
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }

    /// Writes `{prefix}.json` (metadata) and `{prefix}.pt` (the raw
    /// tensor buffer). Both files are written to a `.tmp` sibling first and
    /// renamed into place so no partial write is ever visible.
    pub fn save(&self, path_prefix: impl AsRef<Path>) -> Result<()> {
        let prefix = path_prefix.as_ref();
        if let Some(dir) = prefix.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let dtype = Dtype::from_kind(self.tensor.kind())?;
        let record = VectorRecord {
            version: FORMAT_VERSION.to_string(),
            model_name: self.model_name.clone(),
            layer: self.layer,
            layer_name: self.layer_name.clone(),
            method: self.method.clone(),
            magnitude: self.magnitude,
            shape: self.tensor.size(),
            dtype: dtype.as_wire_str().to_string(),
            created_at: self.created_at,
            metadata: self.metadata.clone(),
        };

        let json_path = json_path(prefix);
        let pt_path = pt_path(prefix);

        let json_tmp = tmp_path(&json_path);
        std::fs::write(&json_tmp, serde_json::to_vec_pretty(&record)?)?;
        std::fs::rename(&json_tmp, &json_path)?;

        let bytes = codec::encode(&self.tensor, dtype)?;
        let pt_tmp = tmp_path(&pt_path);
        std::fs::write(&pt_tmp, bytes)?;
        std::fs::rename(&pt_tmp, &pt_path)?;

        Ok(())
    }

    /// Loads a vector previously written by [`SteeringVector::save`]. The
    /// tensor is reconstructed on CPU; cross-checks the declared shape
    /// against the binary buffer's actual element count.
    pub fn load(path_prefix: impl AsRef<Path>) -> Result<Self> {
        let prefix = path_prefix.as_ref();
        let json_path = json_path(prefix);
        let pt_path = pt_path(prefix);

        if !json_path.exists() {
            return Err(SteeringError::NotFound { path: json_path });
        }
        if !pt_path.exists() {
            return Err(SteeringError::NotFound { path: pt_path });
        }

        let record: VectorRecord = serde_json::from_slice(&std::fs::read(&json_path)?)?;
        let dtype = Dtype::from_wire_str(&record.dtype)?;
        let bytes = std::fs::read(&pt_path)?;
        let (tensor, numel) = codec::decode(&bytes, dtype, Device::Cpu)?;

        let declared = record.shape[0] as usize;
        if declared != numel {
            return Err(SteeringError::ShapeMismatch {
                path: pt_path,
                declared: record.shape.clone(),
                numel,
            });
        }

        Ok(Self {
            tensor,
            layer: record.layer,
            layer_name: record.layer_name,
            model_name: record.model_name,
            method: record.method,
            magnitude: record.magnitude,
            metadata: record.metadata,
            created_at: record.created_at,
        })
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    pub fn layer(&self) -> i64 {
        self.layer
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn dim(&self) -> i64 {
        self.tensor.size()[0]
    }

    /// Two vectors are compatible for composition iff they share shape and
    /// `layer` (spec.md §3).
    pub fn compatible_with(&self, other: &SteeringVector) -> bool {
        self.layer == other.layer && self.tensor.size() == other.tensor.size()
    }
}

fn json_path(prefix: &Path) -> PathBuf {
    with_suffix(prefix, "json")
}

fn pt_path(prefix: &Path) -> PathBuf {
    with_suffix(prefix, "pt")
}

fn with_suffix(prefix: &Path, ext: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec4(values: &[f32]) -> SteeringVector {
        let tensor = Tensor::from_slice(values);
        SteeringVector::construct(tensor, 15, "model.layers.15", "test", Some("mean_difference".into()), None, None, None)
            .unwrap()
    }

    #[test]
    fn magnitude_matches_l2_norm() {
        let v = vec4(&[0.0, 1.0, 2.0, 3.0]);
        assert!((v.magnitude() - 14f64.sqrt()).abs() < 1e-5);
        v.validate(None).unwrap();
    }

    #[test]
    fn rejects_rank_2_tensor() {
        let tensor = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0]).reshape([2, 2]);
        let err = SteeringVector::construct(tensor, 0, "x", "m", None, None, None, None).unwrap_err();
        assert!(matches!(err, SteeringError::InvalidShape { .. }));
    }

    #[test]
    fn rejects_negative_layer() {
        let tensor = Tensor::from_slice(&[1.0f32]);
        let err = SteeringVector::construct(tensor, -1, "x", "m", None, None, None, None).unwrap_err();
        assert!(matches!(err, SteeringError::InvalidLayer { .. }));
    }

    #[test]
    fn validate_rejects_nan() {
        let tensor = Tensor::from_slice(&[f32::NAN, 1.0]);
        let v = SteeringVector::construct(tensor, 0, "x", "m", None, None, None, None).unwrap();
        assert!(matches!(v.validate(None), Err(SteeringError::NonFinite)));
    }

    #[test]
    fn round_trip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("v");
        let v = SteeringVector::construct(
            Tensor::from_slice(&[0.0f32, 1.0, 2.0, 3.0]),
            15,
            "model.layers.15",
            "test",
            Some("mean_difference".into()),
            None,
            None,
            None,
        )
        .unwrap();

        v.save(&prefix).unwrap();
        let loaded = SteeringVector::load(&prefix).unwrap();

        assert_eq!(Vec::<f32>::from(&loaded.tensor), Vec::<f32>::from(&v.tensor));
        assert!((loaded.magnitude() - v.magnitude()).abs() < 1e-6);
        assert_eq!(loaded.created_at(), v.created_at());
        assert_eq!(loaded.layer(), v.layer());
        assert_eq!(loaded.layer_name(), v.layer_name());
        assert_eq!(loaded.model_name(), v.model_name());
        assert_eq!(loaded.method(), v.method());
    }

    #[test]
    fn load_missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = SteeringVector::load(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, SteeringError::NotFound { .. }));
    }
}
