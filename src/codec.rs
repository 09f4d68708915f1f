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

//! Raw byte <-> tensor conversion for the `{prefix}.pt` binary record.
//!
//! The wire format is a single `safetensors` buffer holding one tensor named
//! `"vector"`. safetensors stores dtype + shape in a small JSON header
//! followed by the raw little-endian buffer, which gives bit-exact
//! round-trip of finite values without pulling in a full libtorch pickle
//! codec just to persist a 1-D array.

use std::collections::HashMap;

use half::{bf16, f16};
use safetensors::tensor::{Dtype as StDtype, SafeTensors, TensorView};
use tch::{Device, Tensor};

use crate::dtype::Dtype;
use crate::error::{Result, SteeringError};

const TENSOR_NAME: &str = "vector";

pub fn encode(tensor: &Tensor, dtype: Dtype) -> Result<Vec<u8>> {
    let numel = tensor.numel();
    let shape: Vec<usize> = vec![numel];
    let bytes = match dtype {
        Dtype::Float32 => {
            let mut buf = vec![0f32; numel];
            tensor.copy_data::<f32>(&mut buf, numel);
            bytemuck::cast_slice(&buf).to_vec()
        }
        Dtype::Float16 => {
            let mut buf = vec![f16::from_f32(0.0); numel];
            tensor.copy_data::<f16>(&mut buf, numel);
            bytemuck::cast_slice(&buf).to_vec()
        }
        Dtype::Bfloat16 => {
            let mut buf = vec![bf16::from_f32(0.0); numel];
            tensor.copy_data::<bf16>(&mut buf, numel);
            bytemuck::cast_slice(&buf).to_vec()
        }
    };

    let st_dtype = match dtype {
        Dtype::Float32 => StDtype::F32,
        Dtype::Float16 => StDtype::F16,
        Dtype::Bfloat16 => StDtype::BF16,
    };
    let view = TensorView::new(st_dtype, shape, &bytes)
        .map_err(|e| SteeringError::SafeTensors(e.to_string()))?;
    let mut tensors = HashMap::new();
    tensors.insert(TENSOR_NAME.to_string(), view);
    safetensors::serialize(&tensors, &None).map_err(|e| SteeringError::SafeTensors(e.to_string()))
}

pub fn decode(bytes: &[u8], dtype: Dtype, device: Device) -> Result<(Tensor, usize)> {
    let st = SafeTensors::deserialize(bytes).map_err(|e| SteeringError::SafeTensors(e.to_string()))?;
    let view = st
        .tensor(TENSOR_NAME)
        .map_err(|e| SteeringError::SafeTensors(e.to_string()))?;
    let numel: usize = view.shape().iter().product();
    let data = view.data();

    let floats: Vec<f32> = match dtype {
        Dtype::Float32 => bytemuck::cast_slice::<u8, f32>(data).to_vec(),
        Dtype::Float16 => bytemuck::cast_slice::<u8, f16>(data)
            .iter()
            .map(|v| v.to_f32())
            .collect(),
        Dtype::Bfloat16 => bytemuck::cast_slice::<u8, bf16>(data)
            .iter()
            .map(|v| v.to_f32())
            .collect(),
    };

    let tensor = Tensor::from_slice(&floats)
        .to_kind(dtype.to_kind())
        .to_device(device);
    Ok((tensor, numel))
}
