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

//! The hook mechanism a host transformer block exposes to the steering
//! runtime, and the RAII guard that guarantees cleanup (spec.md §9, "Hook
//! lifetime / exception safety").

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tch::Tensor;

use crate::error::Result;

/// A transformer block's output, in one of the three shapes the Python
/// original's interceptor had to dispatch on at runtime: a bare tensor, a
/// tuple whose first element is the hidden state, or a record exposing a
/// named `hidden_states` field. The enum is the static-dispatch equivalent:
/// we define the shape ourselves, and [`BlockOutput::with_hidden_states`]
/// reconstructs the same variant on the way out so downstream consumers see
/// no structural change.
#[derive(Debug, Clone)]
pub enum BlockOutput {
    Tensor(Tensor),
    Tuple(Vec<Tensor>),
    Named {
        hidden_states: Tensor,
        extra: HashMap<String, Tensor>,
    },
}

impl BlockOutput {
    pub fn hidden_states(&self) -> &Tensor {
        match self {
            BlockOutput::Tensor(t) => t,
            BlockOutput::Tuple(items) => &items[0],
            BlockOutput::Named { hidden_states, .. } => hidden_states,
        }
    }

    /// Returns a copy of `self` with the hidden-state tensor replaced,
    /// preserving the original variant's structural shape.
    pub fn with_hidden_states(&self, new: Tensor) -> BlockOutput {
        match self {
            BlockOutput::Tensor(_) => BlockOutput::Tensor(new),
            BlockOutput::Tuple(items) => {
                let mut items = items.clone();
                items[0] = new;
                BlockOutput::Tuple(items)
            }
            BlockOutput::Named { extra, .. } => BlockOutput::Named {
                hidden_states: new,
                extra: extra.clone(),
            },
        }
    }
}

/// A closure invoked with a block's output on every forward pass; returns
/// the (possibly mutated) replacement output.
pub type SteeringHookFn = Arc<dyn Fn(&BlockOutput) -> BlockOutput + Send + Sync>;

/// Minimal per-block capability the host must expose for a block to be
/// steerable: a single hook slot, set and cleared by the runtime.
pub trait SteerableBlock: Send + Sync {
    fn set_hook(&self, hook: Option<SteeringHookFn>);
}

/// A host's native block-forward computation, wrapped by [`HookedBlock`] to
/// become steerable without the host needing to know anything about
/// steering.
pub trait RawBlockForward: Send + Sync {
    fn raw_forward(&self, input: &BlockOutput) -> Result<BlockOutput>;
}

/// Generic adapter: wraps any `B: RawBlockForward` and applies an optional
/// hook to its output, in block order, on every forward call. This is the
/// reusable decorator a host integration wraps its native block module in.
pub struct HookedBlock<B> {
    inner: B,
    hook: RwLock<Option<SteeringHookFn>>,
}

impl<B: RawBlockForward> HookedBlock<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            hook: RwLock::new(None),
        }
    }

    pub fn forward(&self, input: &BlockOutput) -> Result<BlockOutput> {
        let output = self.inner.raw_forward(input)?;
        let hook = self.hook.read().expect("hook lock poisoned").clone();
        match hook {
            Some(f) => Ok(f(&output)),
            None => Ok(output),
        }
    }
}

impl<B: Send + Sync> SteerableBlock for HookedBlock<B> {
    fn set_hook(&self, hook: Option<SteeringHookFn>) {
        *self.hook.write().expect("hook lock poisoned") = hook;
    }
}

/// RAII scope object: registering a hook on a block returns a `HookGuard`
/// whose `Drop` unregisters it. Both the discovery activation-extraction
/// subroutine and [`crate::model::SteeringModel`] build on top of this so
/// cleanup runs on every exit path, including one unwound through `?`.
pub struct HookGuard {
    block: Arc<dyn SteerableBlock>,
}

impl HookGuard {
    /// Registers `hook` on `block` and returns a guard that removes it when
    /// dropped.
    pub fn attach(block: Arc<dyn SteerableBlock>, hook: SteeringHookFn) -> Self {
        block.set_hook(Some(hook));
        Self { block }
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        self.block.set_hook(None);
    }
}
