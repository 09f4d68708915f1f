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

//! Vector composition: pure arithmetic over [`SteeringVector`]s (spec.md
//! §4.3). Nothing here touches a model or performs I/O.

use serde_json::{json, Map};
use tch::{Kind, Tensor};

use crate::error::{Result, SteeringError};
use crate::vector::SteeringVector;

const DEGENERATE_NORM_SQ: f64 = 1e-10;

fn require_non_empty(vectors: &[SteeringVector]) -> Result<()> {
    if vectors.is_empty() {
        return Err(SteeringError::Empty);
    }
    Ok(())
}

fn require_compatible(vectors: &[SteeringVector]) -> Result<()> {
    let first = &vectors[0];
    for other in &vectors[1..] {
        if !first.compatible_with(other) {
            return Err(SteeringError::Incompatible {
                reason: format!(
                    "layer/shape mismatch: {:?}@{} vs {:?}@{}",
                    first.tensor().size(),
                    first.layer(),
                    other.tensor().size(),
                    other.layer()
                ),
            });
        }
    }
    Ok(())
}

/// `out = sum(w_i * v_i)`, optionally divided by its own L2 norm.
pub fn weighted_sum(
    vectors: &[SteeringVector],
    weights: Option<Vec<f64>>,
    normalize: bool,
) -> Result<SteeringVector> {
    require_non_empty(vectors)?;
    require_compatible(vectors)?;

    let weights = weights.unwrap_or_else(|| vec![1.0; vectors.len()]);
    if weights.len() != vectors.len() {
        return Err(SteeringError::WeightCountMismatch {
            expected: vectors.len(),
            actual: weights.len(),
        });
    }

    let mut total = Tensor::zeros_like(vectors[0].tensor()).to_kind(Kind::Float);
    for (v, w) in vectors.iter().zip(&weights) {
        total = total + v.tensor().to_kind(Kind::Float) * *w;
    }

    if normalize {
        let norm = total.norm().double_value(&[]);
        if norm > 0.0 {
            total = total / norm;
        }
    }

    let source_methods: Vec<String> = vectors.iter().map(|v| v.method().to_string()).collect();
    let method = format!("weighted_sum({})", source_methods.join(", "));

    let mut metadata = Map::new();
    metadata.insert("source_methods".into(), json!(source_methods));
    metadata.insert("weights".into(), json!(weights));
    metadata.insert("normalized".into(), json!(normalize));
    metadata.insert("num_vectors".into(), json!(vectors.len()));

    SteeringVector::construct(
        total,
        vectors[0].layer(),
        vectors[0].layer_name().to_string(),
        vectors[0].model_name().to_string(),
        Some(method),
        Some(metadata),
        None,
        None,
    )
}

/// `cos(a, b) = <a, b> / (||a|| * ||b||)`, `0.0` if either norm is zero.
pub fn compute_similarity(a: &SteeringVector, b: &SteeringVector) -> Result<f64> {
    if a.tensor().size() != b.tensor().size() {
        return Err(SteeringError::Incompatible {
            reason: format!("shape mismatch: {:?} vs {:?}", a.tensor().size(), b.tensor().size()),
        });
    }
    let na = a.magnitude();
    let nb = b.magnitude();
    if na == 0.0 || nb == 0.0 {
        return Ok(0.0);
    }
    let dot = a
        .tensor()
        .to_kind(Kind::Double)
        .dot(&b.tensor().to_kind(Kind::Double))
        .double_value(&[]);
    Ok((dot / (na * nb)).clamp(-1.0, 1.0))
}

/// One over-threshold pair, `i < j`, with the similarity that triggered it.
#[derive(Debug, Clone, Copy)]
pub struct Conflict {
    pub i: usize,
    pub j: usize,
    pub similarity: f64,
}

/// All unordered pairs `(i, j)` with `|cos(v_i, v_j)| >= threshold`, ordered
/// lexicographically on `(i, j)`. Pairs with incompatible shapes are
/// skipped, not errored.
pub fn detect_conflicts(vectors: &[SteeringVector], threshold: f64) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            if vectors[i].tensor().size() != vectors[j].tensor().size() {
                continue;
            }
            if let Ok(similarity) = compute_similarity(&vectors[i], &vectors[j]) {
                if similarity.abs() >= threshold {
                    conflicts.push(Conflict { i, j, similarity });
                }
            }
        }
    }
    conflicts
}

/// Classical Gram-Schmidt: each output vector is unit-norm and orthogonal
/// to every earlier output vector, or the zero vector if the input was
/// already in their span.
pub fn orthogonalize(vectors: &[SteeringVector]) -> Result<Vec<SteeringVector>> {
    require_non_empty(vectors)?;
    require_compatible(vectors)?;

    let mut basis: Vec<Tensor> = Vec::with_capacity(vectors.len());
    let mut outputs = Vec::with_capacity(vectors.len());

    for v in vectors {
        let mut candidate = v.tensor().to_kind(Kind::Float).shallow_clone();
        for prev in &basis {
            let prev_norm_sq = prev.dot(prev).double_value(&[]);
            if prev_norm_sq < DEGENERATE_NORM_SQ {
                continue;
            }
            let coeff = candidate.dot(prev).double_value(&[]) / prev_norm_sq;
            candidate = candidate - prev * coeff;
        }

        let norm = candidate.to_kind(Kind::Double).norm().double_value(&[]);
        let normalized = if norm < DEGENERATE_NORM_SQ.sqrt() {
            Tensor::zeros_like(&candidate)
        } else {
            (&candidate / norm).to_kind(Kind::Float)
        };

        basis.push(normalized.shallow_clone());

        let method = format!("{}_orthogonalized", v.method());
        let mut metadata = v.metadata().clone();
        metadata.insert("orthogonalized_from".into(), json!(v.method()));

        outputs.push(SteeringVector::construct(
            normalized,
            v.layer(),
            v.layer_name().to_string(),
            v.model_name().to_string(),
            Some(method),
            Some(metadata),
            None,
            None,
        )?);
    }

    Ok(outputs)
}

/// Aggregate diagnostics over a set of vectors: symmetric similarity
/// matrix, conflict list at threshold 0.7, per-vector magnitudes, mean
/// magnitude, and a human-readable recommendation.
#[derive(Debug, Clone)]
pub struct CompositionAnalysis {
    pub count: usize,
    pub similarity_matrix: Vec<Vec<f64>>,
    pub conflicts: Vec<Conflict>,
    pub magnitudes: Vec<f64>,
    pub mean_magnitude: f64,
    pub recommendation: String,
}

const DEFAULT_CONFLICT_THRESHOLD: f64 = 0.7;

pub fn analyze_composition(vectors: &[SteeringVector]) -> Result<CompositionAnalysis> {
    require_non_empty(vectors)?;

    let n = vectors.len();
    let mut similarity_matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        similarity_matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let s = if vectors[i].tensor().size() == vectors[j].tensor().size() {
                compute_similarity(&vectors[i], &vectors[j])?
            } else {
                0.0
            };
            similarity_matrix[i][j] = s;
            similarity_matrix[j][i] = s;
        }
    }

    let conflicts = detect_conflicts(vectors, DEFAULT_CONFLICT_THRESHOLD);
    let magnitudes: Vec<f64> = vectors.iter().map(|v| v.magnitude()).collect();
    let mean_magnitude = magnitudes.iter().sum::<f64>() / magnitudes.len() as f64;

    let positive = conflicts.iter().filter(|c| c.similarity > 0.0).count();
    let negative = conflicts.iter().filter(|c| c.similarity < 0.0).count();
    let recommendation = if conflicts.is_empty() {
        "no strongly correlated or opposed pairs; vectors appear independent".to_string()
    } else if positive > 0 && negative == 0 {
        format!("{positive} pair(s) are highly aligned; consider deduplicating or averaging them")
    } else if negative > 0 && positive == 0 {
        format!("{negative} pair(s) point in nearly opposite directions; applying both may cancel out")
    } else {
        format!(
            "{positive} aligned and {negative} opposed pair(s) found; review before composing"
        )
    };

    Ok(CompositionAnalysis {
        count: n,
        similarity_matrix,
        conflicts,
        magnitudes,
        mean_magnitude,
        recommendation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_at(layer: i64, values: &[f32]) -> SteeringVector {
        SteeringVector::construct(
            Tensor::from_slice(values),
            layer,
            "layer.x",
            "test",
            Some("mean_difference".into()),
            None,
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn weighted_sum_matches_worked_example() {
        let v1 = vector_at(5, &[2.0, 2.0, 2.0, 2.0]);
        let v2 = vector_at(5, &[4.0, 4.0, 4.0, 4.0]);
        let out = weighted_sum(&[v1, v2], Some(vec![0.5, 0.5]), false).unwrap();
        assert_eq!(Vec::<f32>::from(out.tensor()), vec![3.0, 3.0, 3.0, 3.0]);
        assert!(out.method().contains("weighted_sum"));
    }

    #[test]
    fn weighted_sum_rejects_incompatible_layers() {
        let v1 = vector_at(5, &[1.0, 0.0]);
        let v2 = vector_at(6, &[0.0, 1.0]);
        let err = weighted_sum(&[v1, v2], None, false).unwrap_err();
        assert!(matches!(err, SteeringError::Incompatible { .. }));
    }

    #[test]
    fn similarity_of_orthogonal_vectors_is_zero() {
        let a = vector_at(0, &[1.0, 0.0]);
        let b = vector_at(0, &[0.0, 1.0]);
        assert!((compute_similarity(&a, &b).unwrap()).abs() < 1e-6);
    }

    #[test]
    fn similarity_of_zero_vector_is_defined_as_zero() {
        let a = vector_at(0, &[0.0, 0.0]);
        let b = vector_at(0, &[1.0, 0.0]);
        assert_eq!(compute_similarity(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn detect_conflicts_finds_parallel_pair() {
        let a = vector_at(0, &[1.0, 0.0]);
        let b = vector_at(0, &[2.0, 0.0]);
        let c = vector_at(0, &[0.0, 1.0]);
        let conflicts = detect_conflicts(&[a, b, c], 0.7);
        assert_eq!(conflicts.len(), 1);
        assert_eq!((conflicts[0].i, conflicts[0].j), (0, 1));
        assert!((conflicts[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonalize_produces_unit_orthogonal_vectors() {
        let a = vector_at(0, &[1.0, 1.0]);
        let b = vector_at(0, &[1.0, 0.0]);
        let out = orthogonalize(&[a, b]).unwrap();
        let n0 = out[0].tensor().to_kind(Kind::Double).norm().double_value(&[]);
        let n1 = out[1].tensor().to_kind(Kind::Double).norm().double_value(&[]);
        assert!((n0 - 1.0).abs() < 1e-5);
        assert!((n1 - 1.0).abs() < 1e-5);
        let dot = out[0]
            .tensor()
            .to_kind(Kind::Double)
            .dot(&out[1].tensor().to_kind(Kind::Double))
            .double_value(&[]);
        assert!(dot.abs() < 1e-5);
        assert!(out[0].method().ends_with("_orthogonalized"));
    }

    #[test]
    fn analyze_composition_reports_aligned_pair() {
        let a = vector_at(0, &[1.0, 0.0]);
        let b = vector_at(0, &[1.0, 0.0]);
        let analysis = analyze_composition(&[a, b]).unwrap();
        assert_eq!(analysis.count, 2);
        assert_eq!(analysis.similarity_matrix[0][1], 1.0);
        assert_eq!(analysis.conflicts.len(), 1);
        assert!(analysis.recommendation.contains("aligned"));
    }
}
