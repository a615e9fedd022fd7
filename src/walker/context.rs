// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Resources shared read-only across one walk (§4.7 steps 1-2): the state
//! and changes stores, the provider registry, and a per-module-instance
//! `EvalContext` cache. Grounded on `ProviderRegistry`'s
//! address-keyed-map-with-at-most-once-construction pattern
//! (`provider/mod.rs`) — here keyed by module path instead of provider
//! address, and with no failure mode to cache since building an `EvalContext`
//! handle cannot fail.

use std::sync::Arc;

use dashmap::DashMap;

use crate::addr::ModulePath;
use crate::changes::ChangesStore;
use crate::eval::EvalContext;
use crate::provider::ProviderRegistry;
use crate::state::StateStore;
use crate::walk_op::WalkOp;

/// Caches one `EvalContext` handle per module-instance path. `EvalContext`
/// clones are cheap — every field is an `Arc` or a handful of bytes — so this
/// cache exists to give every node in the same module instance a stable
/// handle rather than to avoid real construction cost (§5 "shared-resource
/// policy": guarded by its own lock, never held across a provider RPC).
pub struct EvalContextCache {
    base: EvalContext,
    by_module: DashMap<ModulePath, EvalContext>,
}

impl EvalContextCache {
    pub fn new(base: EvalContext) -> Self {
        EvalContextCache {
            base,
            by_module: DashMap::new(),
        }
    }

    pub fn get(&self, module: &ModulePath) -> EvalContext {
        self.by_module
            .entry(module.clone())
            .or_insert_with(|| self.base.clone())
            .clone()
    }
}

/// Everything a node needs in order to execute, shared across the whole walk.
pub struct WalkContext {
    pub state: Arc<StateStore>,
    pub changes: Arc<ChangesStore>,
    pub providers: Arc<ProviderRegistry>,
    pub eval_contexts: Arc<EvalContextCache>,
    pub op: WalkOp,
}

impl WalkContext {
    pub fn eval_context_for(&self, module: &ModulePath) -> EvalContext {
        self.eval_contexts.get(module)
    }
}
