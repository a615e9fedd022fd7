// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! The resource lifecycle engine: per-instance refresh, plan, apply,
//! destroy, forget, and deposed-object handling (§4.6).

pub mod plan;
pub mod provisioner;

use std::sync::Arc;

use crate::addr::{DeposedKey, ProviderAddr, ResourceInstanceAddr};
use crate::changes::{ChangeAction, ChangeReason, ResourceInstanceChange};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{LifecycleError, ProviderError};
use crate::provider::Provider;
use crate::schema::Schema;
use crate::state::{ObjectStatus, ResourceInstanceObject, StateStore};
use crate::value::{conforms, MarkedValue, Type, Value};

pub use plan::{
    plan_data_source, plan_managed_resource, IgnoreChanges, PlanInputs, PlanOutcome, Precondition,
};
pub use provisioner::{
    run_create_provisioners, run_destroy_provisioners, NoopProvisioner, OnFailure, Provisioner,
    ProvisionerFailure, ProvisionerSpec,
};

/// Whether the provider behind an instance predates schema-conformance
/// strictness; legacy providers get conformance errors downgraded to
/// warnings rather than hard failures (§4.6, §7).
fn conformance_diagnostic(
    addr: &ResourceInstanceAddr,
    provider: &ProviderAddr,
    errors: Vec<crate::value::ConformanceError>,
    legacy: bool,
) -> Result<Diagnostics, LifecycleError> {
    if errors.is_empty() {
        return Ok(Diagnostics::new());
    }
    if legacy {
        let mut diags = Diagnostics::new();
        for err in errors {
            diags.push(Diagnostic::warning(
                format!("provider produced a non-conforming value for {addr}"),
                err.to_string(),
            ));
        }
        Ok(diags)
    } else {
        Err(LifecycleError::Provider(ProviderError::ProviderBug(
            provider.clone(),
            errors,
        )))
    }
}

/// Result of a refresh: the (possibly updated) object, plus whatever drift
/// was observed against the prior value (logged, never an error — §4.6).
pub struct RefreshOutcome {
    pub object: Option<ResourceInstanceObject>,
    pub drifted: bool,
    pub diagnostics: Diagnostics,
}

/// Refreshes one resource instance against its provider. No-ops when there is
/// no prior state.
pub async fn refresh(
    addr: &ResourceInstanceAddr,
    prior: Option<ResourceInstanceObject>,
    schema: &Schema,
    provider: &dyn Provider,
) -> Result<RefreshOutcome, LifecycleError> {
    let Some(prior) = prior else {
        return Ok(RefreshOutcome {
            object: None,
            drifted: false,
            diagnostics: Diagnostics::new(),
        });
    };

    let (prior_value, prior_marks) = prior.value.clone().unmark_deep();
    let result = provider
        .read_resource(
            &addr.config.resource_type,
            prior_value.clone(),
            prior.private.clone(),
            None,
        )
        .await
        .map_err(LifecycleError::Provider)?;

    conforms(&result.new_state, &schema.implied_type())
        .map_err(|errors| {
            LifecycleError::Provider(ProviderError::ProviderBug(prior.provider.clone(), errors))
        })?;

    let drifted = prior_value.equals(&result.new_state) != Some(true);
    tracing::debug!(%addr, drifted, "resource instance refreshed");

    if result.new_state.is_null() {
        return Ok(RefreshOutcome {
            object: None,
            drifted,
            diagnostics: result.diagnostics,
        });
    }

    let mut marked = MarkedValue::mark_with_paths(result.new_state, prior_marks);
    for (attr, attr_schema) in &schema.block.attributes {
        if attr_schema.sensitive {
            if let Value::Object(_) = &marked.value {
                marked
                    .marks
                    .entry(crate::value::Path::root().push(crate::value::PathStep::Attr(attr.clone())))
                    .or_default()
                    .insert(crate::value::marks::Mark::Sensitive);
            }
        }
    }

    Ok(RefreshOutcome {
        object: Some(ResourceInstanceObject {
            value: marked,
            status: ObjectStatus::Ready,
            private: result.private,
            dependencies: prior.dependencies,
            create_before_destroy: prior.create_before_destroy,
            provider: prior.provider,
            provider_key: prior.provider_key,
        }),
        drifted,
        diagnostics: result.diagnostics,
    })
}

/// Applies a planned change for one resource instance (§4.6 "Apply").
pub async fn apply(
    change: &ResourceInstanceChange,
    schema: &Schema,
    provider: &dyn Provider,
) -> Result<(Option<ResourceInstanceObject>, Diagnostics), LifecycleError> {
    let mut diagnostics = Diagnostics::new();

    if matches!(change.action, ChangeAction::Delete | ChangeAction::Forget) {
        return Ok((None, diagnostics));
    }
    if matches!(change.action, ChangeAction::Read) {
        if matches!(change.reason, ChangeReason::ReadBecauseConfigUnknown) {
            // Config was still unknown at plan time; now that every upstream
            // dependency is resolved, re-read the data source for real
            // instead of carrying through the plan-time placeholder.
            let config = change.before.clone().ok_or_else(|| {
                LifecycleError::ApplyInconsistency(
                    change.addr.clone(),
                    "deferred data source read has no config to apply".to_string(),
                )
            })?;
            let (config_value, config_marks) = config.unmark_deep();
            let result = provider
                .read_data_source(&change.addr.config.resource_type, config_value, None)
                .await
                .map_err(LifecycleError::Provider)?;
            diagnostics.extend(result.diagnostics);
            conforms(&result.state, &schema.implied_type()).map_err(|errors| {
                LifecycleError::Provider(ProviderError::ProviderBug(change.provider.clone(), errors))
            })?;
            return Ok((
                Some(ResourceInstanceObject {
                    value: MarkedValue::mark_with_paths(result.state, config_marks),
                    status: ObjectStatus::Ready,
                    private: Vec::new(),
                    dependencies: Vec::new(),
                    create_before_destroy: false,
                    provider: change.provider.clone(),
                    provider_key: change.provider.key.clone(),
                }),
                diagnostics,
            ));
        }
        // Already fully resolved during planning; carry the read value
        // through unchanged.
        let after = change.after.clone().ok_or_else(|| {
            LifecycleError::ApplyInconsistency(change.addr.clone(), "missing planned value for data source".to_string())
        })?;
        return Ok((
            Some(ResourceInstanceObject {
                value: after,
                status: ObjectStatus::Ready,
                private: change.private.clone(),
                dependencies: Vec::new(),
                create_before_destroy: false,
                provider: change.provider.clone(),
                provider_key: change.provider.key.clone(),
            }),
            diagnostics,
        ));
    }
    if matches!(change.action, ChangeAction::NoOp) {
        let after = change.after.clone().expect("no-op change always carries `after`");
        return Ok((
            Some(ResourceInstanceObject {
                value: after,
                status: ObjectStatus::Ready,
                private: change.private.clone(),
                dependencies: Vec::new(),
                create_before_destroy: false,
                provider: change.provider.clone(),
                provider_key: change.provider.key.clone(),
            }),
            diagnostics,
        ));
    }

    let after = change
        .after
        .clone()
        .ok_or_else(|| LifecycleError::ApplyInconsistency(change.addr.clone(), "missing planned value".to_string()))?;
    if after.value.contains_unknown() {
        return Err(LifecycleError::ApplyInconsistency(
            change.addr.clone(),
            "planned value still contains unknowns".to_string(),
        ));
    }

    // marks-only update: state changes shape not at all, only its sensitivity
    // annotations, so no provider round trip is needed (§4.6).
    if matches!(change.action, ChangeAction::Update) {
        if let Some(before) = &change.before {
            if before.value.equals(&after.value) == Some(true) {
                return Ok((
                    Some(ResourceInstanceObject {
                        value: after,
                        status: ObjectStatus::Ready,
                        private: change.private.clone(),
                        dependencies: Vec::new(),
                        create_before_destroy: false,
                        provider: change.provider.clone(),
                        provider_key: change.provider.key.clone(),
                    }),
                    diagnostics,
                ));
            }
        }
    }

    let (before_value, _) = change
        .before
        .clone()
        .unwrap_or_else(|| MarkedValue::unmarked(Value::Null(schema.implied_type())))
        .unmark_deep();
    let (config_value, _) = after.clone().unmark_deep();
    let (planned_value, _) = after.clone().unmark_deep();

    let result = provider
        .apply_resource_change(
            &change.addr.config.resource_type,
            before_value,
            config_value,
            planned_value,
            change.private.clone(),
            None,
        )
        .await
        .map_err(LifecycleError::Provider)?;

    let mut new_value = result.new_state;
    if new_value.contains_unknown() {
        diagnostics.push(Diagnostic::error(
            format!("provider left unknown values in {}", change.addr),
            "unknown values after apply are replaced with null and reported as a provider bug",
        ));
        new_value = replace_unknown_with_null(new_value);
    }

    let conformance_diags = conformance_diagnostic(
        &change.addr,
        &change.provider,
        conforms(&new_value, &schema.implied_type()).err().unwrap_or_default(),
        result.legacy_type_system,
    )?;
    diagnostics.extend(conformance_diags);

    if !matches!(change.action, ChangeAction::Delete)
        && new_value.equals(&after.value) == Some(false)
        && !result.legacy_type_system
    {
        return Err(LifecycleError::ApplyInconsistency(
            change.addr.clone(),
            "applied value is not compatible with the planned value".to_string(),
        ));
    }

    Ok((
        Some(ResourceInstanceObject {
            value: MarkedValue::mark_with_paths(new_value, after.marks),
            status: ObjectStatus::Ready,
            private: result.private,
            dependencies: Vec::new(),
            create_before_destroy: false,
            provider: change.provider.clone(),
            provider_key: change.provider.key.clone(),
        }),
        diagnostics,
    ))
}

/// Applies a planned change and runs its configured provisioners at the
/// right point relative to the underlying provider call (§4.6
/// "Provisioners"): create-time provisioners run after a successful create
/// and before the object would otherwise be considered `ready`; destroy-time
/// provisioners run before the delete takes effect. A resource with no
/// provisioners configured should just call [`apply`] directly; this wrapper
/// is for the ones that do.
pub async fn apply_with_provisioners(
    change: &ResourceInstanceChange,
    schema: &Schema,
    provider: &dyn Provider,
    provisioners: &[ProvisionerSpec],
) -> Result<(Option<ResourceInstanceObject>, Diagnostics), LifecycleError> {
    if matches!(change.action, ChangeAction::Delete) {
        let provisioner_diags = run_destroy_provisioners(&change.addr, provisioners).await?;
        let (object, mut diagnostics) = apply(change, schema, provider).await?;
        diagnostics.extend(provisioner_diags);
        return Ok((object, diagnostics));
    }

    let (object, mut diagnostics) = apply(change, schema, provider).await?;

    let is_create = matches!(change.action, ChangeAction::Create) || change.action.is_replace();
    let Some(object) = object else {
        return Ok((None, diagnostics));
    };
    if !is_create || provisioners.is_empty() {
        return Ok((Some(object), diagnostics));
    }

    match run_create_provisioners(&change.addr, object, provisioners).await {
        Ok((object, provisioner_diags)) => {
            diagnostics.extend(provisioner_diags);
            Ok((Some(object), diagnostics))
        }
        Err(failure) => {
            diagnostics.push(Diagnostic::error(
                format!("provisioner for {} failed", change.addr),
                failure.error.to_string(),
            ));
            Ok((Some(failure.object), diagnostics))
        }
    }
}

fn replace_unknown_with_null(value: Value) -> Value {
    match value {
        Value::Unknown(ty) => Value::Null(ty),
        Value::List(items) => Value::List(items.into_iter().map(replace_unknown_with_null).collect()),
        Value::Set(items) => Value::Set(items.into_iter().map(replace_unknown_with_null).collect()),
        Value::Tuple(items) => Value::Tuple(items.into_iter().map(replace_unknown_with_null).collect()),
        Value::Map(items) => Value::Map(
            items
                .into_iter()
                .map(|(k, v)| (k, replace_unknown_with_null(v)))
                .collect(),
        ),
        Value::Object(items) => Value::Object(
            items
                .into_iter()
                .map(|(k, v)| (k, replace_unknown_with_null(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Plans the destruction of one instance (§4.6 "Destroy").
pub async fn plan_destroy(
    addr: &ResourceInstanceAddr,
    prior: Option<&ResourceInstanceObject>,
    provider: &dyn Provider,
) -> Result<ResourceInstanceChange, LifecycleError> {
    let Some(prior) = prior else {
        return Ok(no_op_change(addr.clone(), prior_provider_addr(addr)));
    };
    if prior.value.value.is_null() {
        return Ok(no_op_change(addr.clone(), prior.provider.clone()));
    }

    let (prior_value, _) = prior.value.clone().unmark_deep();
    let null_ty = prior_value.implied_type();
    let result = provider
        .plan_resource_change(
            &addr.config.resource_type,
            prior_value.clone(),
            prior_value.clone(),
            Value::Null(null_ty),
            prior.private.clone(),
            None,
        )
        .await
        .map_err(LifecycleError::Provider)?;

    if !result.planned_state.is_null() {
        return Err(LifecycleError::PlannedInconsistency(
            addr.clone(),
            "provider did not plan a null state for a destroy".to_string(),
        ));
    }

    Ok(ResourceInstanceChange {
        addr: addr.clone(),
        prev_run_addr: addr.clone(),
        action: ChangeAction::Delete,
        before: Some(prior.value.clone()),
        after: None,
        provider: prior.provider.clone(),
        deposed_key: None,
        reason: ChangeReason::None,
        private: Vec::new(),
    })
}

fn no_op_change(addr: ResourceInstanceAddr, provider: ProviderAddr) -> ResourceInstanceChange {
    ResourceInstanceChange {
        addr: addr.clone(),
        prev_run_addr: addr,
        action: ChangeAction::NoOp,
        before: None,
        after: None,
        provider,
        deposed_key: None,
        reason: ChangeReason::None,
        private: Vec::new(),
    }
}

fn prior_provider_addr(addr: &ResourceInstanceAddr) -> ProviderAddr {
    ProviderAddr {
        source: crate::addr::ProviderSource {
            hostname: String::new(),
            namespace: String::new(),
            type_name: addr.config.resource_type.clone(),
        },
        module: addr.config.module.clone(),
        alias: None,
        key: addr.key.clone(),
    }
}

/// Produces a `forget` change for an instance targeted by a `remove`
/// statement without `destroy = true` (§4.6 "Forget"), with the warning the
/// engine is expected to surface for it.
pub fn plan_forget(addr: &ResourceInstanceAddr, provider: ProviderAddr) -> (ResourceInstanceChange, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    diagnostics.push(Diagnostic::warning(
        "Resource going to be removed from the state",
        format!("{addr} matched a `remove` block without `destroy = true`; it will be dropped from state without being destroyed"),
    ));
    (
        ResourceInstanceChange {
            addr: addr.clone(),
            prev_run_addr: addr.clone(),
            action: ChangeAction::Forget,
            before: None,
            after: None,
            provider,
            deposed_key: None,
            reason: ChangeReason::None,
            private: Vec::new(),
        },
        diagnostics,
    )
}

/// Applies a forget: removes all state for the instance without consulting
/// the provider.
pub fn apply_forget(state: &StateStore, addr: &ResourceInstanceAddr) {
    state.forget_resource_instance_all(addr);
}

/// Evaluates `prevent_destroy` for an instance about to be deleted or
/// replaced. The expression is evaluated in a no-instance scope; the result
/// must be a known, non-null, non-sensitive boolean (§4.6).
pub fn check_prevent_destroy(
    addr: &ResourceInstanceAddr,
    prevent_destroy: &MarkedValue,
) -> Result<(), LifecycleError> {
    if matches!(prevent_destroy.value, Value::Unknown(_)) {
        return Err(LifecycleError::PreventDestroyUnknown(addr.clone()));
    }
    if matches!(prevent_destroy.value, Value::Null(_)) {
        return Err(LifecycleError::PreventDestroyNull(addr.clone()));
    }
    if prevent_destroy.is_sensitive() {
        return Err(LifecycleError::PreventDestroy(addr.clone()));
    }
    if matches!(prevent_destroy.value, Value::Bool(true)) {
        return Err(LifecycleError::PreventDestroy(addr.clone()));
    }
    Ok(())
}

/// Plans a deposed object: either `delete` (the default) or `forget` when a
/// `remove` statement targets its owner without `destroy = true` (§4.6
/// "Deposed objects").
pub async fn plan_deposed(
    addr: &ResourceInstanceAddr,
    deposed_key: &DeposedKey,
    object: &ResourceInstanceObject,
    removed_without_destroy: bool,
    provider: &dyn Provider,
) -> Result<(ResourceInstanceChange, Diagnostics), LifecycleError> {
    let mut diagnostics = Diagnostics::new();
    if removed_without_destroy {
        diagnostics.push(Diagnostic::warning(
            format!("deposed object {addr} (key {deposed_key}) will be forgotten, not destroyed"),
            "a `remove` statement targeted this resource/module without `destroy = true`",
        ));
        return Ok((
            ResourceInstanceChange {
                addr: addr.clone(),
                prev_run_addr: addr.clone(),
                action: ChangeAction::Forget,
                before: Some(object.value.clone()),
                after: None,
                provider: object.provider.clone(),
                deposed_key: Some(deposed_key.clone()),
                reason: ChangeReason::None,
                private: Vec::new(),
            },
            diagnostics,
        ));
    }

    let change = plan_destroy(addr, Some(object), provider).await?;
    Ok((
        ResourceInstanceChange {
            deposed_key: Some(deposed_key.clone()),
            ..change
        },
        diagnostics,
    ))
}

/// Generates the config snippet recorded alongside an import change. The
/// engine only generates config when explicitly requested (§4.6 "Import");
/// otherwise this returns `None` and the change is planned without one.
pub fn generate_import_config(resource_type: &str, imported: &Value) -> Option<String> {
    let Value::Object(attrs) = imported else {
        return None;
    };
    let mut lines = Vec::new();
    for (name, value) in attrs {
        if let Some(rendered) = render_literal(value) {
            lines.push(format!("  {name} = {rendered}"));
        }
    }
    Some(format!("resource \"{resource_type}\" \"imported\" {{\n{}\n}}", lines.join("\n")))
}

fn render_literal(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(format!("{s:?}")),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Plans an import: reads the resource by id, then plans it against an empty
/// configuration the way a freshly-created resource would be planned,
/// recording the generated config snippet on the resulting change (§4.6).
pub async fn plan_import(
    addr: &ResourceInstanceAddr,
    provider: Arc<dyn Provider>,
    schema: &Schema,
    resource_type: &str,
) -> Result<(ResourceInstanceChange, Option<String>), LifecycleError> {
    let read = provider
        .read_resource(resource_type, Value::Null(schema.implied_type()), Vec::new(), None)
        .await
        .map_err(LifecycleError::Provider)?;
    conforms(&read.new_state, &schema.implied_type()).map_err(|errors| {
        LifecycleError::Provider(ProviderError::ProviderBug(prior_provider_addr(addr), errors))
    })?;

    let generated_config = generate_import_config(resource_type, &read.new_state);
    let value = MarkedValue::unmarked(read.new_state);
    Ok((
        ResourceInstanceChange {
            addr: addr.clone(),
            prev_run_addr: addr.clone(),
            action: ChangeAction::NoOp,
            before: None,
            after: Some(value),
            provider: prior_provider_addr(addr),
            deposed_key: None,
            reason: ChangeReason::None,
            private: read.private,
        },
        generated_config,
    ))
}
