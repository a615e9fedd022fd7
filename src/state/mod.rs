// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! The state store: a concurrent container for resource instances (current
//! and deposed), output values, local values, and check results, addressed
//! by hierarchical addresses (§4.2).
//!
//! Concurrently-written maps use `dashmap` keyed collections guarded
//! per-entry, at a fine enough grain that writers serialize only against
//! writers of the *same* key.

mod checks;

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::addr::{DeposedKey, Generation, InstanceKey, LocalAddr, ModulePath, OutputAddr, ProviderAddr, ResourceInstanceAddr};
use crate::error::StateError;
use crate::value::MarkedValue;

pub use checks::{CheckResult, CheckStatus, CheckableAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    Ready,
    Tainted,
    Planned,
}

/// A resource instance object: a value conforming to a resource schema plus
/// the bookkeeping the engine needs to apply further changes to it.
#[derive(Debug, Clone)]
pub struct ResourceInstanceObject {
    pub value: MarkedValue,
    pub status: ObjectStatus,
    pub private: Vec<u8>,
    pub dependencies: Vec<ResourceInstanceAddr>,
    pub create_before_destroy: bool,
    pub provider: ProviderAddr,
    pub provider_key: InstanceKey,
}

#[derive(Debug, Default)]
struct ResourceInstanceEntry {
    current: Option<ResourceInstanceObject>,
    deposed: BTreeMap<DeposedKey, ResourceInstanceObject>,
}

impl ResourceInstanceEntry {
    fn is_empty(&self) -> bool {
        self.current.is_none() && self.deposed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct OutputValueEntry {
    pub value: MarkedValue,
    pub sensitive: bool,
    pub deprecation: Option<String>,
}

/// The state store. Every method takes `&self`: internal synchronization is
/// per-key (a `DashMap` shard lock plus, for resource instances, a nested
/// `RwLock` so readers don't block other readers of the same instance).
#[derive(Default)]
pub struct StateStore {
    resources: DashMap<ResourceInstanceAddr, RwLock<ResourceInstanceEntry>>,
    outputs: DashMap<OutputAddr, OutputValueEntry>,
    locals: DashMap<LocalAddr, MarkedValue>,
    /// Reference count of live resource instances (current or deposed) per
    /// module instance, used to prune empty "husk" entries once a module
    /// instance has no resources left in it.
    module_instances: DashMap<ModulePath, usize>,
    checks: RwLock<BTreeMap<CheckableAddr, CheckResult>>,
}

impl StateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn bump_module_refcount(&self, module: &ModulePath, delta: i64) {
        let mut entry = self.module_instances.entry(module.clone()).or_insert(0);
        if delta >= 0 {
            *entry += delta as usize;
        } else {
            *entry = entry.saturating_sub((-delta) as usize);
        }
        if *entry == 0 {
            drop(entry);
            self.module_instances.remove(module);
        }
    }

    pub fn set_resource_instance_current(
        &self,
        addr: ResourceInstanceAddr,
        object: ResourceInstanceObject,
    ) {
        let module = addr.module().clone();
        let is_new = {
            let entry = self.resources.entry(addr).or_default();
            let mut guard = entry.write();
            let was_present = guard.current.is_some();
            guard.current = Some(object);
            !was_present
        };
        if is_new {
            self.bump_module_refcount(&module, 1);
        }
    }

    pub fn set_resource_instance_deposed(
        &self,
        addr: ResourceInstanceAddr,
        deposed_key: DeposedKey,
        object: ResourceInstanceObject,
    ) {
        let module = addr.module().clone();
        let is_new = {
            let entry = self.resources.entry(addr).or_default();
            let mut guard = entry.write();
            let was_present = guard.deposed.contains_key(&deposed_key);
            guard.deposed.insert(deposed_key, object);
            !was_present
        };
        if is_new {
            self.bump_module_refcount(&module, 1);
        }
    }

    pub fn resource_instance_current(
        &self,
        addr: &ResourceInstanceAddr,
    ) -> Option<ResourceInstanceObject> {
        self.resources
            .get(addr)
            .and_then(|entry| entry.read().current.clone())
    }

    pub fn resource_instance_deposed(
        &self,
        addr: &ResourceInstanceAddr,
        key: &DeposedKey,
    ) -> Option<ResourceInstanceObject> {
        self.resources
            .get(addr)
            .and_then(|entry| entry.read().deposed.get(key).cloned())
    }

    pub fn resource_instance_generation(
        &self,
        addr: &ResourceInstanceAddr,
        generation: &Generation,
    ) -> Option<ResourceInstanceObject> {
        match generation {
            Generation::Current => self.resource_instance_current(addr),
            Generation::Deposed(key) => self.resource_instance_deposed(addr, key),
        }
    }

    pub fn deposed_keys(&self, addr: &ResourceInstanceAddr) -> Vec<DeposedKey> {
        self.resources
            .get(addr)
            .map(|entry| entry.read().deposed.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes both the current and every deposed object for an instance
    /// without consulting the provider — the "forget" operation (§4.2, §4.6).
    pub fn forget_resource_instance_all(&self, addr: &ResourceInstanceAddr) {
        let module = addr.module().clone();
        let removed = if let Some(entry) = self.resources.get(addr) {
            let mut guard = entry.write();
            let count = guard.current.take().is_some() as i64 + guard.deposed.len() as i64;
            guard.deposed.clear();
            count
        } else {
            0
        };
        if removed > 0 {
            self.bump_module_refcount(&module, -removed);
        }
        // Prune the husk entry entirely once it holds nothing.
        if let Some(entry) = self.resources.get(addr) {
            if entry.read().is_empty() {
                drop(entry);
                self.resources.remove(addr);
            }
        }
    }

    /// Removes one specific deposed object (used once it has been destroyed
    /// on apply).
    pub fn remove_resource_instance_deposed(&self, addr: &ResourceInstanceAddr, key: &DeposedKey) {
        let module = addr.module().clone();
        let removed = self
            .resources
            .get(addr)
            .map(|entry| entry.write().deposed.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            self.bump_module_refcount(&module, -1);
        }
        if let Some(entry) = self.resources.get(addr) {
            if entry.read().is_empty() {
                drop(entry);
                self.resources.remove(addr);
            }
        }
    }

    /// Removes the current object only (used once a `delete` change has been
    /// applied).
    pub fn remove_resource_instance_current(&self, addr: &ResourceInstanceAddr) {
        let module = addr.module().clone();
        let removed = self
            .resources
            .get(addr)
            .map(|entry| entry.write().current.take().is_some())
            .unwrap_or(false);
        if removed {
            self.bump_module_refcount(&module, -1);
        }
        if let Some(entry) = self.resources.get(addr) {
            if entry.read().is_empty() {
                drop(entry);
                self.resources.remove(addr);
            }
        }
    }

    pub fn has_any_resources_in_module(&self, module: &ModulePath) -> bool {
        self.module_instances.get(module).is_some()
    }

    pub fn output_value(&self, addr: &OutputAddr) -> Option<OutputValueEntry> {
        self.outputs.get(addr).map(|e| e.clone())
    }

    pub fn set_output_value(
        &self,
        addr: OutputAddr,
        value: MarkedValue,
        sensitive: bool,
        deprecation: Option<String>,
    ) {
        self.outputs.insert(
            addr,
            OutputValueEntry {
                value,
                sensitive,
                deprecation,
            },
        );
    }

    pub fn local_value(&self, addr: &LocalAddr) -> Option<MarkedValue> {
        self.locals.get(addr).map(|v| v.clone())
    }

    pub fn set_local_value(&self, addr: LocalAddr, value: MarkedValue) {
        self.locals.insert(addr, value);
    }

    pub fn discard_check_results(&self) {
        self.checks.write().clear();
    }

    /// Registers the checkable object addresses for a configuration address,
    /// in the "unknown" verdict, ahead of the walk evaluating them (two-phase
    /// reporting: registration then verdict, §4.2).
    pub fn report_checkable_objects(&self, addrs: impl IntoIterator<Item = CheckableAddr>) {
        let mut checks = self.checks.write();
        for addr in addrs {
            checks.entry(addr).or_insert(CheckResult {
                status: CheckStatus::Unknown,
                message: None,
            });
        }
    }

    pub fn set_check_result(&self, addr: CheckableAddr, result: CheckResult) -> Result<(), StateError> {
        let mut checks = self.checks.write();
        checks.insert(addr, result);
        Ok(())
    }

    pub fn check_result(&self, addr: &CheckableAddr) -> Option<CheckResult> {
        self.checks.read().get(addr).cloned()
    }

    /// A deep copy of this store, used by the walker when starting a walk
    /// that must not observe mutations made by a previous, now-discarded
    /// attempt (e.g. re-planning).
    pub fn deep_clone(&self) -> Arc<StateStore> {
        let clone = StateStore::default();
        for entry in self.resources.iter() {
            clone
                .resources
                .insert(entry.key().clone(), RwLock::new(clone_entry(&entry.read())));
        }
        for entry in self.outputs.iter() {
            clone.outputs.insert(entry.key().clone(), entry.value().clone());
        }
        for entry in self.locals.iter() {
            clone.locals.insert(entry.key().clone(), entry.value().clone());
        }
        for entry in self.module_instances.iter() {
            clone
                .module_instances
                .insert(entry.key().clone(), *entry.value());
        }
        *clone.checks.write() = self.checks.read().clone();
        Arc::new(clone)
    }
}

fn clone_entry(entry: &ResourceInstanceEntry) -> ResourceInstanceEntry {
    ResourceInstanceEntry {
        current: entry.current.clone(),
        deposed: entry.deposed.clone(),
    }
}
