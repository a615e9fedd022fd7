// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! The changes store: a concurrent container of planned
//! `ResourceInstanceChange` records, queryable by address/generation and by
//! configuration resource (§4.3).

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::addr::{ConfigResourceAddr, DeposedKey, Generation, ProviderAddr, ResourceInstanceAddr};
use crate::value::{MarkTable, MarkedValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    NoOp,
    Create,
    Read,
    Update,
    DeleteThenCreate,
    CreateThenDelete,
    Delete,
    Forget,
}

impl ChangeAction {
    pub fn is_replace(self) -> bool {
        matches!(self, ChangeAction::DeleteThenCreate | ChangeAction::CreateThenDelete)
    }

    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            ChangeAction::Delete | ChangeAction::DeleteThenCreate | ChangeAction::CreateThenDelete
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    None,
    ReplaceBecauseCannotUpdate,
    ReplaceByRequest,
    ReplaceByTriggers,
    Tainted,
    DeleteBecauseNoResourceConfig,
    DeleteBecauseCountIndex,
    DeleteBecauseEachKey,
    DeleteBecauseNoModule,
    ReadBecauseConfigUnknown,
}

/// A planned change, with marks carried inline. The store strips them into a
/// side table when [`ChangesStore::encode`] produces the serializable form
/// (§4.3: "Encoding strips marks ... preserved separately as side-channel
/// metadata on the change").
#[derive(Debug, Clone)]
pub struct ResourceInstanceChange {
    pub addr: ResourceInstanceAddr,
    pub prev_run_addr: ResourceInstanceAddr,
    pub action: ChangeAction,
    pub before: Option<MarkedValue>,
    pub after: Option<MarkedValue>,
    pub provider: ProviderAddr,
    pub deposed_key: Option<DeposedKey>,
    pub reason: ChangeReason,
    pub private: Vec<u8>,
}

impl ResourceInstanceChange {
    fn generation(&self) -> Generation {
        match &self.deposed_key {
            Some(key) => Generation::Deposed(key.clone()),
            None => Generation::Current,
        }
    }
}

/// The serializable encoding of a change: bare values, with every mark
/// recorded separately.
#[derive(Debug, Clone)]
pub struct EncodedChange {
    pub addr: ResourceInstanceAddr,
    pub prev_run_addr: ResourceInstanceAddr,
    pub action: ChangeAction,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub provider: ProviderAddr,
    pub deposed_key: Option<DeposedKey>,
    pub reason: ChangeReason,
    pub private: Vec<u8>,
    pub before_marks: MarkTable,
    pub after_marks: MarkTable,
}

impl ResourceInstanceChange {
    /// Encodes this change for storage, enforcing the data-model invariant
    /// that `after` is null for `delete` and `before` is null for `create`.
    pub fn encode(&self) -> EncodedChange {
        let before = if matches!(self.action, ChangeAction::Create) {
            None
        } else {
            self.before.clone()
        };
        let after = if matches!(self.action, ChangeAction::Delete | ChangeAction::Forget) {
            None
        } else {
            self.after.clone()
        };
        let (before_value, before_marks) = before
            .map(|v| v.unmark_deep())
            .map(|(v, m)| (Some(v), m))
            .unwrap_or((None, MarkTable::new()));
        let (after_value, after_marks) = after
            .map(|v| v.unmark_deep())
            .map(|(v, m)| (Some(v), m))
            .unwrap_or((None, MarkTable::new()));
        EncodedChange {
            addr: self.addr.clone(),
            prev_run_addr: self.prev_run_addr.clone(),
            action: self.action,
            before: before_value,
            after: after_value,
            provider: self.provider.clone(),
            deposed_key: self.deposed_key.clone(),
            reason: self.reason,
            private: self.private.clone(),
            before_marks,
            after_marks,
        }
    }
}

#[derive(Default)]
pub struct ChangesStore {
    changes: DashMap<(ResourceInstanceAddr, Generation), EncodedChange>,
}

impl ChangesStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn append_resource_instance_change(&self, change: ResourceInstanceChange) {
        let key = (change.addr.clone(), change.generation());
        self.changes.insert(key, change.encode());
    }

    pub fn remove_resource_instance_change(&self, addr: &ResourceInstanceAddr, generation: &Generation) {
        self.changes.remove(&(addr.clone(), generation.clone()));
    }

    pub fn get_resource_instance_change(
        &self,
        addr: &ResourceInstanceAddr,
        generation: &Generation,
    ) -> Option<EncodedChange> {
        self.changes
            .get(&(addr.clone(), generation.clone()))
            .map(|r| r.clone())
    }

    /// All pending changes for a configuration resource (across every
    /// instance key), used by the evaluator to detect dependency-pending
    /// reads (§4.4).
    pub fn get_changes_for_config_resource(
        &self,
        config_addr: &ConfigResourceAddr,
    ) -> Vec<EncodedChange> {
        self.changes
            .iter()
            .filter(|entry| &entry.key().0.config == config_addr)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn all(&self) -> BTreeMap<(ResourceInstanceAddr, Generation), EncodedChange> {
        self.changes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{InstanceKey, ModulePath, ProviderSource, ResourceMode};
    use crate::value::Type;

    fn addr(name: &str) -> ResourceInstanceAddr {
        ResourceInstanceAddr {
            config: ConfigResourceAddr {
                module: ModulePath::root(),
                mode: ResourceMode::Managed,
                resource_type: "test_instance".to_string(),
                name: name.to_string(),
            },
            key: InstanceKey::None,
        }
    }

    fn provider() -> ProviderAddr {
        ProviderAddr {
            source: ProviderSource {
                hostname: "registry.example.com".to_string(),
                namespace: "hashicorp".to_string(),
                type_name: "test".to_string(),
            },
            module: ModulePath::root(),
            alias: None,
            key: InstanceKey::None,
        }
    }

    #[test]
    fn encode_nulls_after_for_delete_and_before_for_create() {
        let change = ResourceInstanceChange {
            addr: addr("foo"),
            prev_run_addr: addr("foo"),
            action: ChangeAction::Create,
            before: Some(MarkedValue::unmarked(Value::Null(Type::Object(Default::default())))),
            after: Some(MarkedValue::unmarked(Value::Object(Default::default()))),
            provider: provider(),
            deposed_key: None,
            reason: ChangeReason::None,
            private: Vec::new(),
        };
        let encoded = change.encode();
        assert!(encoded.before.is_none());
        assert!(encoded.after.is_some());

        let delete = ResourceInstanceChange {
            action: ChangeAction::Delete,
            ..change
        };
        let encoded = delete.encode();
        assert!(encoded.after.is_none());
    }

    #[test]
    fn append_then_get_round_trips_by_generation() {
        let store = ChangesStore::new();
        let change = ResourceInstanceChange {
            addr: addr("foo"),
            prev_run_addr: addr("foo"),
            action: ChangeAction::Update,
            before: Some(MarkedValue::unmarked(Value::Object(Default::default()))),
            after: Some(MarkedValue::unmarked(Value::Object(Default::default()))),
            provider: provider(),
            deposed_key: None,
            reason: ChangeReason::None,
            private: Vec::new(),
        };
        store.append_resource_instance_change(change.clone());
        let fetched = store
            .get_resource_instance_change(&change.addr, &Generation::Current)
            .unwrap();
        assert_eq!(fetched.action, ChangeAction::Update);
    }
}
