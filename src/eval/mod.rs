// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! The expression evaluator: resolves references against the state and
//! changes stores, scoped to one module instance (§4.4).

pub mod reference;
pub mod scope;

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::addr::{ConfigResourceAddr, Generation, LocalAddr, ModulePath, ResourceInstanceAddr};
use crate::changes::{ChangeAction, ChangesStore};
use crate::error::EvalError;
use crate::provider::FunctionBridge;
use crate::state::StateStore;
use crate::value::marks::Mark;
use crate::value::{MarkTable, MarkedValue, Type, Value};
use crate::walk_op::WalkOp;

pub use reference::{parse_reference, PathKind, Reference, RepetitionMode};
pub use scope::{RepetitionBinding, Scope};

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub ty: Type,
    pub sensitive: bool,
}

/// Evaluates expressions for one walk. Shared by every per-module-instance
/// `Scope` the walker creates; holds `Arc`s to the state/changes stores so
/// cloning an `EvalContext` handle is cheap (teacher pattern: `Context` in
/// `context.rs` is `Clone` over `Arc` fields for the same reason).
#[derive(Clone)]
pub struct EvalContext {
    pub state: Arc<StateStore>,
    pub changes: Arc<ChangesStore>,
    pub walk_op: WalkOp,
    pub pure_only: bool,
    pub plan_timestamp: String,
    pub workspace: String,
    variable_decls: Arc<DashMap<(ModulePath, String), VariableDecl>>,
    variable_values: Arc<DashMap<(ModulePath, String), MarkedValue>>,
    pub functions: Arc<FunctionBridge>,
}

impl EvalContext {
    pub fn new(
        state: Arc<StateStore>,
        changes: Arc<ChangesStore>,
        walk_op: WalkOp,
        workspace: impl Into<String>,
        functions: Arc<FunctionBridge>,
    ) -> Self {
        EvalContext {
            state,
            changes,
            walk_op,
            pure_only: false,
            plan_timestamp: String::new(),
            workspace: workspace.into(),
            variable_decls: Arc::new(DashMap::new()),
            variable_values: Arc::new(DashMap::new()),
            functions,
        }
    }

    pub fn declare_variable(&self, module: ModulePath, name: impl Into<String>, decl: VariableDecl) {
        self.variable_decls.insert((module, name.into()), decl);
    }

    pub fn set_variable(&self, module: ModulePath, name: impl Into<String>, value: MarkedValue) {
        self.variable_values.insert((module, name.into()), value);
    }

    pub fn set_local(&self, addr: LocalAddr, value: MarkedValue) {
        self.state.set_local_value(addr, value);
    }

    /// Resolves a single reference within `scope`. See §4.4 for the
    /// per-reference-kind rules this implements.
    pub async fn resolve(&self, scope: &Scope, reference: &Reference) -> Result<MarkedValue, EvalError> {
        match reference {
            Reference::Count => scope
                .count_index()
                .map(MarkedValue::unmarked)
                .ok_or_else(|| EvalError::Undeclared {
                    kind: "count",
                    name: "index".to_string(),
                }),
            Reference::Each => scope
                .each_key()
                .map(MarkedValue::unmarked)
                .ok_or_else(|| EvalError::Undeclared {
                    kind: "each",
                    name: "key".to_string(),
                }),
            Reference::Path(_kind) => Ok(MarkedValue::unmarked(Value::String(scope.module.to_string()))),
            Reference::Workspace => Ok(MarkedValue::unmarked(Value::String(self.workspace.clone()))),
            Reference::Var(name) => self.resolve_var(&scope.module, name),
            Reference::Local(name) => self.resolve_local(&scope.module, name),
            Reference::Output(addr) | Reference::ModuleOutput(addr) => {
                match self.state.output_value(addr) {
                    Some(entry) => {
                        let mut value = entry.value;
                        if entry.sensitive {
                            value.marks.entry(Default::default()).or_default().insert(Mark::Sensitive);
                        }
                        Ok(value)
                    }
                    None if self.walk_op.is_validate() => {
                        Ok(MarkedValue::unmarked(Value::Unknown(Type::Dynamic)))
                    }
                    None => Err(EvalError::Undeclared {
                        kind: "output",
                        name: addr.to_string(),
                    }),
                }
            }
            Reference::ResourceInstance(addr) => self.resolve_resource_instance(addr).await,
            Reference::ResourceCollection(config_addr, mode) => {
                self.resolve_resource_collection(config_addr, *mode).await
            }
        }
    }

    fn resolve_var(&self, module: &ModulePath, name: &str) -> Result<MarkedValue, EvalError> {
        let key = (module.clone(), name.to_string());
        let decl = self.variable_decls.get(&key);
        match self.variable_values.get(&key) {
            Some(value) => {
                let mut value = value.clone();
                if decl.as_ref().is_some_and(|d| d.sensitive) {
                    value
                        .marks
                        .entry(Default::default())
                        .or_default()
                        .insert(Mark::Sensitive);
                }
                Ok(value)
            }
            None if self.walk_op.is_validate() => {
                let ty = decl.map(|d| d.ty.clone()).unwrap_or(Type::Dynamic);
                Ok(MarkedValue::unmarked(Value::Unknown(ty)))
            }
            None => Err(EvalError::Undeclared {
                kind: "variable",
                name: name.to_string(),
            }),
        }
    }

    fn resolve_local(&self, module: &ModulePath, name: &str) -> Result<MarkedValue, EvalError> {
        let addr = LocalAddr {
            module: module.clone(),
            name: name.to_string(),
        };
        match self.state.local_value(&addr) {
            Some(value) => Ok(value),
            None if self.walk_op.is_validate() => Ok(MarkedValue::unmarked(Value::Unknown(Type::Dynamic))),
            None => Err(EvalError::Undeclared {
                kind: "local",
                name: name.to_string(),
            }),
        }
    }

    /// Whether a pending change excludes this instance from being read right
    /// now: a `delete`/`forget` is planned and this isn't a destroy walk
    /// (§4.4).
    fn is_excluded(&self, change_action: Option<ChangeAction>) -> bool {
        match change_action {
            Some(ChangeAction::Delete) | Some(ChangeAction::Forget) => {
                !self.walk_op.is_destroy_walk()
            }
            _ => false,
        }
    }

    async fn resolve_resource_instance(
        &self,
        addr: &ResourceInstanceAddr,
    ) -> Result<MarkedValue, EvalError> {
        if let Some(change) = self.changes.get_resource_instance_change(addr, &Generation::Current) {
            if self.is_excluded(Some(change.action)) {
                return Ok(MarkedValue::unmarked(Value::Null(Type::Dynamic)));
            }
            // A planned instance's `after` (with marks) is authoritative over
            // whatever is still sitting in state (§4.4).
            return Ok(match change.after {
                Some(value) => MarkedValue::mark_with_paths(value, change.after_marks),
                None => MarkedValue::unmarked(Value::Null(Type::Dynamic)),
            });
        }

        match self.state.resource_instance_current(addr) {
            Some(obj) => Ok(obj.value),
            None if self.walk_op.is_destroy_walk() => {
                Ok(MarkedValue::unmarked(Value::Null(Type::Dynamic)))
            }
            None => Ok(MarkedValue::unmarked(Value::Unknown(Type::Dynamic))),
        }
    }

    async fn resolve_resource_collection(
        &self,
        config_addr: &ConfigResourceAddr,
        mode: RepetitionMode,
    ) -> Result<MarkedValue, EvalError> {
        if matches!(mode, RepetitionMode::Single) {
            // A singly-declared resource addressed without a key: treat the
            // implicit key as `None` and resolve it as one instance.
            let addr = ResourceInstanceAddr::new(config_addr.clone(), crate::addr::InstanceKey::None);
            return self.resolve_resource_instance(&addr).await;
        }

        let pending = self.changes.get_changes_for_config_resource(config_addr);
        if pending.is_empty() {
            if self.walk_op.is_validate() {
                return Ok(MarkedValue::unmarked(Value::Unknown(Type::Dynamic)));
            }
            // No instances at all: an empty tuple/object, per §4.4.
            return Ok(MarkedValue::unmarked(Value::Tuple(Vec::new())));
        }

        let mut entries = BTreeMap::new();
        for change in pending {
            if self.is_excluded(Some(change.action)) {
                continue;
            }
            if let Some(after) = change.after {
                let marked = MarkedValue::mark_with_paths(after, change.after_marks);
                entries.insert(change.addr.key.to_string(), marked);
            }
        }
        let mut combined_marks = MarkTable::new();
        let object: BTreeMap<String, Value> = entries
            .into_iter()
            .map(|(k, v)| {
                let (value, marks) = v.unmark_deep();
                for (path, set) in marks {
                    let mut steps = vec![crate::value::marks::PathStep::Attr(k.clone())];
                    steps.extend(path.0);
                    combined_marks
                        .entry(crate::value::marks::Path(steps))
                        .or_default()
                        .extend(set);
                }
                (k, value)
            })
            .collect();
        Ok(MarkedValue::mark_with_paths(Value::Object(object), combined_marks))
    }
}
