// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Planning: managed-resource plans (including replace-path splicing and
//! `ignore_changes` handling) and data-source plans (§4.6).

use std::collections::BTreeMap;

use crate::addr::{ProviderAddr, ResourceInstanceAddr};
use crate::changes::{ChangeAction, ChangeReason, ResourceInstanceChange};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{LifecycleError, ProviderError};
use crate::provider::Provider;
use crate::schema::Schema;
use crate::state::{ObjectStatus, ResourceInstanceObject};
use crate::value::marks::{Path, PathStep};
use crate::value::{conforms, MarkedValue, Type, Value};

use super::conformance_diagnostic;

/// How `ignore_changes` applies to a managed resource's config before
/// planning (§4.6).
#[derive(Debug, Clone)]
pub enum IgnoreChanges {
    None,
    All,
    Paths(Vec<Path>),
}

/// One precondition block attached to the resource: the evaluated condition
/// value and the error message to use if it's false.
#[derive(Debug, Clone)]
pub struct Precondition {
    pub condition: MarkedValue,
    pub error_message: String,
}

pub struct PlanInputs {
    pub addr: ResourceInstanceAddr,
    pub prior: Option<ResourceInstanceObject>,
    pub config: MarkedValue,
    pub preconditions: Vec<Precondition>,
    pub ignore_changes: IgnoreChanges,
    pub force_replace: bool,
    pub provider_addr: ProviderAddr,
}

pub struct PlanOutcome {
    pub change: Option<ResourceInstanceChange>,
    pub diagnostics: Diagnostics,
    /// Set when a data-source plan nested in a `check` block failed; the
    /// caller reports this to the state store's check results rather than
    /// treating it as a fatal diagnostic (§4.2, §4.6).
    pub check_failed: bool,
}

fn failed(addr: &ResourceInstanceAddr, message: impl Into<String>) -> PlanOutcome {
    let mut diagnostics = Diagnostics::new();
    diagnostics.push(Diagnostic::error(format!("precondition failed for {addr}"), message));
    PlanOutcome {
        change: None,
        diagnostics,
        check_failed: false,
    }
}

/// Plans a managed resource instance.
pub async fn plan_managed_resource(
    inputs: PlanInputs,
    schema: &Schema,
    provider: &dyn Provider,
) -> Result<PlanOutcome, LifecycleError> {
    for precondition in &inputs.preconditions {
        if matches!(precondition.condition.value, Value::Unknown(_)) {
            continue;
        }
        if !matches!(precondition.condition.value, Value::Bool(true)) {
            return Ok(failed(&inputs.addr, precondition.error_message.clone()));
        }
    }

    let mut diagnostics = Diagnostics::new();

    let validate_diags = provider
        .validate_resource_config(&inputs.addr.config.resource_type, inputs.config.value.clone())
        .await
        .map_err(LifecycleError::Provider)?;
    if validate_diags.has_errors() {
        diagnostics.extend(validate_diags);
        return Ok(PlanOutcome {
            change: None,
            diagnostics,
            check_failed: false,
        });
    }
    diagnostics.extend(validate_diags);

    let prior_value = inputs.prior.as_ref().map(|p| p.value.value.clone());
    let config_after_ignore = apply_ignore_changes(
        inputs.config.value.clone(),
        prior_value.as_ref(),
        &inputs.ignore_changes,
        schema,
    );

    let proposed_new_state = merge_proposed_new_state(prior_value.as_ref(), &config_after_ignore, schema);

    let prior_for_provider = prior_value.clone().unwrap_or(Value::Null(schema.implied_type()));
    let prior_private = inputs
        .prior
        .as_ref()
        .map(|p| p.private.clone())
        .unwrap_or_default();

    let mut result = provider
        .plan_resource_change(
            &inputs.addr.config.resource_type,
            config_after_ignore.clone(),
            prior_for_provider.clone(),
            proposed_new_state,
            prior_private,
            None,
        )
        .await
        .map_err(LifecycleError::Provider)?;

    if inputs.prior.is_some() && matches!(inputs.ignore_changes, IgnoreChanges::Paths(_)) && result.legacy_type_system
    {
        // Legacy-SDK tolerance: a legacy provider may re-introduce a
        // suppressed diff in its own planned value; revert it once more.
        result.planned_state = apply_ignore_changes(
            result.planned_state,
            prior_value.as_ref(),
            &inputs.ignore_changes,
            schema,
        );
    }

    let conformance_diags = conformance_diagnostic(
        &inputs.addr,
        &inputs.provider_addr,
        conforms(&result.planned_state, &schema.implied_type())
            .err()
            .unwrap_or_default(),
        result.legacy_type_system,
    )?;
    diagnostics.extend(conformance_diags);
    diagnostics.extend(result.diagnostics);

    let was_tainted = inputs
        .prior
        .as_ref()
        .is_some_and(|p| matches!(p.status, ObjectStatus::Tainted));

    let requires_replace: Vec<Path> = result
        .requires_replace
        .into_iter()
        .filter(|path| attribute_value_changed(prior_value.as_ref(), &result.planned_state, path))
        .collect();

    let prior_is_null = prior_value.as_ref().map_or(true, Value::is_null);
    let values_equal = prior_value
        .as_ref()
        .map(|p| p.equals(&result.planned_state))
        .unwrap_or(Some(false));

    let mut action = if prior_is_null {
        ChangeAction::Create
    } else if was_tainted || !requires_replace.is_empty() || inputs.force_replace {
        if inputs
            .prior
            .as_ref()
            .is_some_and(|p| p.create_before_destroy)
        {
            ChangeAction::CreateThenDelete
        } else {
            ChangeAction::DeleteThenCreate
        }
    } else if values_equal == Some(true) {
        ChangeAction::NoOp
    } else {
        ChangeAction::Update
    };

    // Only the sensitivity marks differ: still a meaningful state rewrite.
    if matches!(action, ChangeAction::NoOp) && inputs.config.is_sensitive() != prior_sensitive(&inputs.prior) {
        action = ChangeAction::Update;
    }

    let mut before = inputs.prior.as_ref().map(|p| p.value.clone());
    let mut after = Some(MarkedValue::mark_with_paths(
        result.planned_state.clone(),
        inputs.config.marks.clone(),
    ));

    if action.is_replace() {
        let create_half = provider
            .plan_resource_change(
                &inputs.addr.config.resource_type,
                config_after_ignore.clone(),
                Value::Null(schema.implied_type()),
                merge_proposed_new_state(None, &config_after_ignore, schema),
                Vec::new(),
                None,
            )
            .await
            .map_err(LifecycleError::Provider)?;
        after = Some(MarkedValue::mark_with_paths(create_half.planned_state, inputs.config.marks.clone()));
    }

    if matches!(action, ChangeAction::Create) {
        before = None;
    }

    let reason = if was_tainted {
        ChangeReason::Tainted
    } else if inputs.force_replace {
        ChangeReason::ReplaceByRequest
    } else {
        ChangeReason::None
    };

    Ok(PlanOutcome {
        change: Some(ResourceInstanceChange {
            addr: inputs.addr.clone(),
            prev_run_addr: inputs.addr,
            action,
            before,
            after,
            provider: inputs.provider_addr,
            deposed_key: None,
            reason,
            private: result.planned_private,
        }),
        diagnostics,
        check_failed: false,
    })
}

fn prior_sensitive(prior: &Option<ResourceInstanceObject>) -> bool {
    prior.as_ref().is_some_and(|p| p.value.is_sensitive())
}

/// Merges a prior value and planned config into the `ProposedNewState` a
/// provider plans against: computed-only attributes always come from the
/// prior object (or `unknown` when there is none, i.e. on create); every
/// other attribute comes from the configuration (§4.6).
fn merge_proposed_new_state(prior: Option<&Value>, config: &Value, schema: &Schema) -> Value {
    let Value::Object(config_attrs) = config else {
        return config.clone();
    };
    let prior_attrs = match prior {
        Some(Value::Object(attrs)) => Some(attrs),
        _ => None,
    };
    let mut merged = BTreeMap::new();
    for (name, attr_schema) in &schema.block.attributes {
        if attr_schema.is_computed_only() {
            let value = prior_attrs
                .and_then(|attrs| attrs.get(name))
                .cloned()
                .unwrap_or_else(|| Value::Unknown(attr_schema.ty.clone()));
            merged.insert(name.clone(), value);
        } else if let Some(value) = config_attrs.get(name) {
            merged.insert(name.clone(), value.clone());
        }
    }
    for (name, value) in config_attrs {
        merged.entry(name.clone()).or_insert_with(|| value.clone());
    }
    Value::Object(merged)
}

/// Applies `ignore_changes` to a config value before planning.
fn apply_ignore_changes(
    config: Value,
    prior: Option<&Value>,
    ignore: &IgnoreChanges,
    schema: &Schema,
) -> Value {
    let Some(prior) = prior else {
        return config;
    };
    match ignore {
        IgnoreChanges::None => config,
        IgnoreChanges::All => {
            let Value::Object(mut attrs) = config else {
                return prior.clone();
            };
            let Value::Object(prior_attrs) = prior else {
                return Value::Object(attrs);
            };
            for name in schema.block.computed_only_attribute_names() {
                if let Some(prior_value) = prior_attrs.get(&name) {
                    attrs.insert(name, prior_value.clone());
                }
            }
            Value::Object(attrs)
        }
        IgnoreChanges::Paths(paths) => {
            let mut value = config;
            for path in paths {
                if let Some(prior_value) = get_path(prior, path) {
                    value = set_path(value, path, prior_value.clone());
                }
            }
            value
        }
    }
}

/// Reads the value at `path` within `value`, honoring map/object element
/// semantics (a missing key is simply absent, not an error).
fn get_path<'a>(value: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut current = value;
    for step in &path.0 {
        current = match (current, step) {
            (Value::Object(attrs), PathStep::Attr(name)) => attrs.get(name)?,
            (Value::Map(attrs), PathStep::Attr(name)) => attrs.get(name)?,
            (Value::List(items) | Value::Tuple(items), PathStep::Index(i)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes `new_value` at `path` within `value`, returning the updated value.
/// Missing intermediate containers leave `value` unchanged at that branch
/// (there is nothing sensible to revert if the shape itself changed).
fn set_path(value: Value, path: &Path, new_value: Value) -> Value {
    set_path_steps(value, &path.0, new_value)
}

fn set_path_steps(value: Value, steps: &[PathStep], new_value: Value) -> Value {
    let Some((head, rest)) = steps.split_first() else {
        return new_value;
    };
    match (value, head) {
        (Value::Object(mut attrs), PathStep::Attr(name)) => {
            if let Some(existing) = attrs.remove(name) {
                attrs.insert(name.clone(), set_path_steps(existing, rest, new_value));
            }
            Value::Object(attrs)
        }
        (Value::Map(mut attrs), PathStep::Attr(name)) => {
            if let Some(existing) = attrs.remove(name) {
                attrs.insert(name.clone(), set_path_steps(existing, rest, new_value));
            }
            Value::Map(attrs)
        }
        (Value::List(mut items), PathStep::Index(i)) => {
            if let Some(existing) = items.get(*i).cloned() {
                items[*i] = set_path_steps(existing, rest, new_value);
            }
            Value::List(items)
        }
        (Value::Tuple(mut items), PathStep::Index(i)) => {
            if let Some(existing) = items.get(*i).cloned() {
                items[*i] = set_path_steps(existing, rest, new_value);
            }
            Value::Tuple(items)
        }
        (other, _) => other,
    }
}

/// Whether the value at `path` actually differs between prior and planned —
/// used to filter `RequiresReplace` paths where only sensitivity changed
/// (§4.6).
fn attribute_value_changed(prior: Option<&Value>, planned: &Value, path: &Path) -> bool {
    let planned_at = get_path(planned, path);
    let prior_at = prior.and_then(|p| get_path(p, path));
    match (prior_at, planned_at) {
        (None, None) => false,
        (Some(a), Some(b)) => a.equals(b) != Some(true),
        _ => true,
    }
}

/// Builds a placeholder value matching `ty`'s shape with every leaf replaced
/// by `unknown` — used for a data-source `read` plan when config or upstream
/// dependencies are not fully known (§4.6).
fn unknown_placeholder(ty: &Type) -> Value {
    match ty {
        Type::Object(attrs) => Value::Object(
            attrs
                .iter()
                .map(|(name, t)| (name.clone(), unknown_placeholder(t)))
                .collect(),
        ),
        Type::Tuple(elems) => Value::Tuple(elems.iter().map(unknown_placeholder).collect()),
        other => Value::Unknown(other.clone()),
    }
}

/// Plans a data source read.
pub async fn plan_data_source(
    addr: &ResourceInstanceAddr,
    data_source_type: &str,
    config: &MarkedValue,
    schema: &Schema,
    provider: &dyn Provider,
    provider_addr: ProviderAddr,
    in_check_block: bool,
) -> Result<PlanOutcome, LifecycleError> {
    let validate_diags = provider
        .validate_data_resource_config(data_source_type, config.value.clone())
        .await
        .map_err(LifecycleError::Provider)?;
    if validate_diags.has_errors() {
        return Ok(PlanOutcome {
            change: None,
            diagnostics: validate_diags,
            check_failed: in_check_block,
        });
    }

    if config.value.contains_unknown() {
        let after = MarkedValue::mark_with_paths(unknown_placeholder(&schema.implied_type()), config.marks.clone());
        return Ok(PlanOutcome {
            change: Some(ResourceInstanceChange {
                addr: addr.clone(),
                prev_run_addr: addr.clone(),
                action: ChangeAction::Read,
                // Carries the (not-yet-fully-known) config forward so `apply`
                // can re-read the data source once every dependency is
                // resolved; data sources have no "before" value otherwise.
                before: Some(config.clone()),
                after: Some(after),
                provider: provider_addr,
                deposed_key: None,
                reason: ChangeReason::ReadBecauseConfigUnknown,
                private: Vec::new(),
            }),
            diagnostics: validate_diags,
            check_failed: false,
        });
    }

    let result = provider
        .read_data_source(data_source_type, config.value.clone(), None)
        .await
        .map_err(LifecycleError::Provider)?;

    let mut diagnostics = validate_diags;
    let mut check_failed = false;
    if result.diagnostics.has_errors() {
        if in_check_block {
            for diag in result.diagnostics.0 {
                diagnostics.push(Diagnostic::warning(diag.summary, diag.detail));
            }
            check_failed = true;
        } else {
            diagnostics.extend(result.diagnostics);
            return Ok(PlanOutcome {
                change: None,
                diagnostics,
                check_failed: false,
            });
        }
    } else {
        diagnostics.extend(result.diagnostics);
    }

    conforms(&result.state, &schema.implied_type()).map_err(|errors| {
        LifecycleError::Provider(ProviderError::ProviderBug(provider_addr.clone(), errors))
    })?;

    Ok(PlanOutcome {
        change: Some(ResourceInstanceChange {
            addr: addr.clone(),
            prev_run_addr: addr.clone(),
            action: ChangeAction::Read,
            before: None,
            after: Some(MarkedValue::mark_with_paths(result.state, config.marks.clone())),
            provider: provider_addr,
            deposed_key: None,
            reason: ChangeReason::None,
            private: Vec::new(),
        }),
        diagnostics,
        check_failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    use async_trait::async_trait;
    use rstest::rstest;

    use crate::addr::{ConfigResourceAddr, InstanceKey, ModulePath, ProviderSource, ResourceMode};
    use crate::schema::{AttributeSchema, Block};
    use crate::provider::{
        ApplyResourceChangeResult, FunctionCallError, FunctionSpec, PlanResourceChangeResult,
        Provider, ReadDataSourceResult, ReadResourceResult,
    };
    use crate::schema::ProviderSchemas;

    /// Echoes `proposed_new_state` back as the planned state and never
    /// requires replacement on its own — the action-decision matrix below
    /// drives replacement purely through `force_replace`/tainted priors.
    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        async fn get_provider_schema(&self) -> Result<ProviderSchemas, ProviderError> {
            Ok(ProviderSchemas::default())
        }
        async fn get_functions(&self) -> Result<Map<String, FunctionSpec>, ProviderError> {
            Ok(Map::new())
        }
        async fn configure_provider(&self, _config: MarkedValue) -> Result<Diagnostics, ProviderError> {
            Ok(Diagnostics::new())
        }
        async fn validate_resource_config(&self, _resource_type: &str, _config: Value) -> Result<Diagnostics, ProviderError> {
            Ok(Diagnostics::new())
        }
        async fn validate_data_resource_config(&self, _data_source_type: &str, _config: Value) -> Result<Diagnostics, ProviderError> {
            Ok(Diagnostics::new())
        }
        async fn upgrade_resource_state(&self, _resource_type: &str, _raw: Vec<u8>, _version: u64) -> Result<Value, ProviderError> {
            unimplemented!()
        }
        async fn read_resource(&self, _resource_type: &str, _prior_state: Value, _private: Vec<u8>, _provider_meta: Option<Value>) -> Result<ReadResourceResult, ProviderError> {
            unimplemented!()
        }
        async fn plan_resource_change(
            &self,
            _resource_type: &str,
            _config: Value,
            _prior_state: Value,
            proposed_new_state: Value,
            _prior_private: Vec<u8>,
            _provider_meta: Option<Value>,
        ) -> Result<PlanResourceChangeResult, ProviderError> {
            Ok(PlanResourceChangeResult {
                planned_state: proposed_new_state,
                planned_private: Vec::new(),
                requires_replace: Vec::new(),
                legacy_type_system: false,
                diagnostics: Diagnostics::new(),
            })
        }
        async fn apply_resource_change(&self, _resource_type: &str, _prior_state: Value, _config: Value, _planned_state: Value, _planned_private: Vec<u8>, _provider_meta: Option<Value>) -> Result<ApplyResourceChangeResult, ProviderError> {
            unimplemented!()
        }
        async fn read_data_source(&self, _data_source_type: &str, _config: Value, _provider_meta: Option<Value>) -> Result<ReadDataSourceResult, ProviderError> {
            unimplemented!()
        }
        async fn call_function(&self, _name: &str, _args: Vec<Value>) -> Result<Value, FunctionCallError> {
            unimplemented!()
        }
        async fn stop(&self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn test_addr() -> ResourceInstanceAddr {
        ResourceInstanceAddr {
            config: ConfigResourceAddr {
                module: ModulePath::root(),
                mode: ResourceMode::Managed,
                resource_type: "test_instance".to_string(),
                name: "foo".to_string(),
            },
            key: InstanceKey::None,
        }
    }

    fn test_provider_addr() -> ProviderAddr {
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

    fn object_value(tag: &str) -> Value {
        Value::Object(Map::from([("tag".to_string(), Value::String(tag.to_string()))]))
    }

    fn test_schema() -> Schema {
        Schema {
            block: Block {
                attributes: Map::from([(
                    "tag".to_string(),
                    AttributeSchema::required(Type::String),
                )]),
                ..Default::default()
            },
            version: 1,
        }
    }

    fn prior_object(tag: &str, status: ObjectStatus) -> ResourceInstanceObject {
        ResourceInstanceObject {
            value: MarkedValue::unmarked(object_value(tag)),
            status,
            private: Vec::new(),
            dependencies: Vec::new(),
            create_before_destroy: false,
            provider: test_provider_addr(),
            provider_key: InstanceKey::None,
        }
    }

    /// Table test over the action-decision matrix in `plan_managed_resource`:
    /// given a prior object (or none), a config tag, and the
    /// tainted/force-replace/create-before-destroy flags, the resulting
    /// action must match the expected outcome in each case.
    #[rstest]
    #[case::create_when_no_prior(None, "a", false, ChangeAction::Create)]
    #[case::no_op_when_values_equal(Some(("a", ObjectStatus::Ready, false)), "a", false, ChangeAction::NoOp)]
    #[case::update_when_values_differ(Some(("a", ObjectStatus::Ready, false)), "b", false, ChangeAction::Update)]
    #[case::delete_then_create_on_force_replace(Some(("a", ObjectStatus::Ready, false)), "a", true, ChangeAction::DeleteThenCreate)]
    #[case::create_then_delete_on_force_replace_with_cbd(Some(("a", ObjectStatus::Ready, true)), "a", true, ChangeAction::CreateThenDelete)]
    #[case::tainted_prior_forces_replace(Some(("a", ObjectStatus::Tainted, false)), "a", false, ChangeAction::DeleteThenCreate)]
    #[tokio::test]
    async fn action_decision_matrix(
        #[case] prior: Option<(&str, ObjectStatus, bool)>,
        #[case] config_tag: &str,
        #[case] force_replace: bool,
        #[case] expected: ChangeAction,
    ) {
        let prior = prior.map(|(tag, status, cbd)| {
            let mut object = prior_object(tag, status);
            object.create_before_destroy = cbd;
            object
        });
        let inputs = PlanInputs {
            addr: test_addr(),
            prior,
            config: MarkedValue::unmarked(object_value(config_tag)),
            preconditions: Vec::new(),
            ignore_changes: IgnoreChanges::None,
            force_replace,
            provider_addr: test_provider_addr(),
        };

        let outcome = plan_managed_resource(inputs, &test_schema(), &EchoProvider)
            .await
            .unwrap();
        let change = outcome.change.expect("plan should produce a change");
        assert_eq!(change.action, expected);
    }

    #[test]
    fn ignore_changes_paths_reverts_only_selected_attribute() {
        let prior = Value::Object(Map::from([
            ("tags".to_string(), Value::String("keep".to_string())),
            ("size".to_string(), Value::String("prior".to_string())),
        ]));
        let config = Value::Object(Map::from([
            ("tags".to_string(), Value::String("changed".to_string())),
            ("size".to_string(), Value::String("new".to_string())),
        ]));
        let schema = Schema {
            block: Default::default(),
            version: 1,
        };
        let path = Path(vec![PathStep::Attr("tags".to_string())]);
        let result = apply_ignore_changes(config, Some(&prior), &IgnoreChanges::Paths(vec![path]), &schema);
        match result {
            Value::Object(attrs) => {
                assert_eq!(attrs.get("tags"), Some(&Value::String("keep".to_string())));
                assert_eq!(attrs.get("size"), Some(&Value::String("new".to_string())));
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn attribute_value_changed_ignores_mark_only_differences() {
        let prior = Value::String("x".to_string());
        let planned = Value::String("x".to_string());
        assert!(!attribute_value_changed(Some(&prior), &planned, &Path::root()));
    }

    #[test]
    fn unknown_placeholder_matches_object_shape() {
        let ty = Type::Object(Map::from([("id".to_string(), Type::String)]));
        let placeholder = unknown_placeholder(&ty);
        match placeholder {
            Value::Object(attrs) => assert!(matches!(attrs.get("id"), Some(Value::Unknown(Type::String)))),
            other => panic!("expected object, got {other:?}"),
        }
    }
}
