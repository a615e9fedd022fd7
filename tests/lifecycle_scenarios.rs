// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenario tests for the resource lifecycle engine and the
//! provider-function bridge, one per seed scenario.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use tf_core::addr::{
    ConfigResourceAddr, DeposedKey, InstanceKey, ModulePath, ProviderAddr, ProviderSource,
    ResourceInstanceAddr, ResourceMode,
};
use tf_core::changes::{ChangeAction, ChangeReason, ResourceInstanceChange};
use tf_core::diagnostics::Diagnostics;
use tf_core::error::{LifecycleError, ProviderError};
use tf_core::lifecycle::{
    apply, apply_with_provisioners, check_prevent_destroy, plan_data_source, plan_deposed,
    plan_forget, OnFailure, Provisioner, ProvisionerSpec,
};
use tf_core::provider::functions::{FunctionParam, FunctionSpec};
use tf_core::provider::{
    ApplyResourceChangeResult, FunctionBridge, FunctionCallError, PlanResourceChangeResult, Provider,
    ReadDataSourceResult, ReadResourceResult,
};
use tf_core::schema::{AttributeSchema, Block, ProviderSchemas, Schema};
use tf_core::state::{ObjectStatus, ResourceInstanceObject};
use tf_core::value::marks::{Mark, Path};
use tf_core::value::{MarkTable, MarkedValue, Type, Value};

fn root_addr(name: &str) -> ResourceInstanceAddr {
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

fn module_instance_addr(module: &str, module_key: i64, name: &str) -> ResourceInstanceAddr {
    ResourceInstanceAddr {
        config: ConfigResourceAddr {
            module: ModulePath::root().child(module, InstanceKey::Int(module_key)),
            mode: ResourceMode::Managed,
            resource_type: "test_instance".to_string(),
            name: name.to_string(),
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

/// Installs a test-scoped `tracing` subscriber so diagnostics logged by the
/// lifecycle engine surface in `cargo test -- --nocapture` output. Safe to
/// call from every test: `try_init` no-ops once a global subscriber is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ready_object(value: Value) -> ResourceInstanceObject {
    ResourceInstanceObject {
        value: MarkedValue::unmarked(value),
        status: ObjectStatus::Ready,
        private: Vec::new(),
        dependencies: Vec::new(),
        create_before_destroy: false,
        provider: test_provider_addr(),
        provider_key: InstanceKey::None,
    }
}

/// A `Provider` that records how many times each RPC was called and the bare
/// arguments `call_function` received, so tests can assert on both outcomes
/// and call-count invariants (at-most-once / exactly-once dispatch).
#[derive(Default)]
struct RecordingProvider {
    read_resource_calls: AtomicUsize,
    plan_resource_change_calls: AtomicUsize,
    call_function_calls: AtomicUsize,
    received_call_args: std::sync::Mutex<Vec<Vec<Value>>>,
}

#[async_trait]
impl Provider for RecordingProvider {
    async fn get_provider_schema(&self) -> Result<ProviderSchemas, ProviderError> {
        Ok(ProviderSchemas::default())
    }
    async fn get_functions(&self) -> Result<BTreeMap<String, FunctionSpec>, ProviderError> {
        Ok(BTreeMap::new())
    }
    async fn configure_provider(&self, _config: MarkedValue) -> Result<Diagnostics, ProviderError> {
        Ok(Diagnostics::new())
    }
    async fn validate_resource_config(
        &self,
        _resource_type: &str,
        _config: Value,
    ) -> Result<Diagnostics, ProviderError> {
        Ok(Diagnostics::new())
    }
    async fn validate_data_resource_config(
        &self,
        _data_source_type: &str,
        _config: Value,
    ) -> Result<Diagnostics, ProviderError> {
        Ok(Diagnostics::new())
    }
    async fn upgrade_resource_state(
        &self,
        _resource_type: &str,
        _raw: Vec<u8>,
        _version: u64,
    ) -> Result<Value, ProviderError> {
        unimplemented!("not exercised by these scenarios")
    }
    async fn read_resource(
        &self,
        _resource_type: &str,
        prior_state: Value,
        private: Vec<u8>,
        _provider_meta: Option<Value>,
    ) -> Result<ReadResourceResult, ProviderError> {
        self.read_resource_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ReadResourceResult {
            new_state: prior_state,
            private,
            diagnostics: Diagnostics::new(),
        })
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
        self.plan_resource_change_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PlanResourceChangeResult {
            planned_state: proposed_new_state,
            planned_private: Vec::new(),
            requires_replace: Vec::new(),
            legacy_type_system: false,
            diagnostics: Diagnostics::new(),
        })
    }
    async fn apply_resource_change(
        &self,
        _resource_type: &str,
        _prior_state: Value,
        _config: Value,
        planned_state: Value,
        planned_private: Vec<u8>,
        _provider_meta: Option<Value>,
    ) -> Result<ApplyResourceChangeResult, ProviderError> {
        Ok(ApplyResourceChangeResult {
            new_state: planned_state,
            private: planned_private,
            legacy_type_system: false,
            diagnostics: Diagnostics::new(),
        })
    }
    async fn read_data_source(
        &self,
        _data_source_type: &str,
        config: Value,
        _provider_meta: Option<Value>,
    ) -> Result<ReadDataSourceResult, ProviderError> {
        Ok(ReadDataSourceResult {
            state: config,
            diagnostics: Diagnostics::new(),
        })
    }
    async fn call_function(&self, name: &str, args: Vec<Value>) -> Result<Value, FunctionCallError> {
        self.call_function_calls.fetch_add(1, Ordering::SeqCst);
        self.received_call_args.lock().unwrap().push(args.clone());
        match name {
            "echo" => Ok(args.into_iter().next().unwrap_or(Value::Null(Type::Dynamic))),
            "arn_parse" => Ok(Value::String("arn:aws:parsed".to_string())),
            other => Err(FunctionCallError {
                argument_index: None,
                message: format!("unknown function {other}"),
            }),
        }
    }
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }
    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Scenario 1: a root resource with one deposed object and no `remove`
/// statement targeting it plans to `delete` that object, consulting the
/// provider to confirm the destroy (§4.6 "Deposed objects", §8 scenario 1).
#[tokio::test]
async fn deposed_object_with_no_remove_statement_plans_delete() {
    init_tracing();
    let addr = root_addr("foo");
    let deposed_key = DeposedKey::new_random();
    let object = ready_object(Value::Object(BTreeMap::from([(
        "id".to_string(),
        Value::String("abc".to_string()),
    )])));
    let provider = RecordingProvider::default();

    let (change, diagnostics) = plan_deposed(&addr, &deposed_key, &object, false, &provider)
        .await
        .unwrap();

    assert_eq!(change.action, tf_core::changes::ChangeAction::Delete);
    assert_eq!(change.deposed_key.as_ref(), Some(&deposed_key));
    assert!(!diagnostics.has_errors());
    assert_eq!(provider.plan_resource_change_calls.load(Ordering::SeqCst), 1);
}

/// Scenario 2: a resource inside a module instance targeted by a `remove`
/// statement without `destroy = true` plans `forget` and carries the
/// "Resource going to be removed from the state" warning (§4.6 "Forget", §8
/// scenario 2).
#[test]
fn remove_statement_without_destroy_plans_forget_with_warning() {
    init_tracing();
    let addr = module_instance_addr("boop", 1, "foo");
    let (change, diagnostics) = plan_forget(&addr, test_provider_addr());

    assert_eq!(change.action, tf_core::changes::ChangeAction::Forget);
    assert!(diagnostics
        .0
        .iter()
        .any(|d| d.summary == "Resource going to be removed from the state"));
}

/// A deposed object targeted by the same kind of `remove` statement goes
/// through the forget branch of `plan_deposed` instead of being destroyed,
/// and never touches the provider.
#[tokio::test]
async fn deposed_object_removed_without_destroy_is_forgotten_not_destroyed() {
    init_tracing();
    let addr = root_addr("foo");
    let deposed_key = DeposedKey::new_random();
    let object = ready_object(Value::Object(BTreeMap::new()));
    let provider = RecordingProvider::default();

    let (change, diagnostics) = plan_deposed(&addr, &deposed_key, &object, true, &provider)
        .await
        .unwrap();

    assert_eq!(change.action, tf_core::changes::ChangeAction::Forget);
    assert_eq!(provider.plan_resource_change_calls.load(Ordering::SeqCst), 0);
    assert!(diagnostics.0.iter().any(|d| d.summary.contains("forgotten")));
}

/// Scenario 3: calling a provider function while the provider is still
/// unconfigured (validate-time) resolves through the dynamic placeholder
/// without ever reaching the provider (§4.4, §8 scenario 3).
#[tokio::test]
async fn provider_function_during_validate_uses_placeholder() {
    init_tracing();
    let bridge = FunctionBridge::placeholder();
    assert!(bridge.is_placeholder());

    let result = bridge
        .call(
            "provider::aws::arn_parse",
            vec![MarkedValue::unmarked(Value::String("x".to_string()))],
        )
        .await
        .unwrap();

    assert!(matches!(result.value, Value::Unknown(Type::Dynamic)));
}

/// Scenario 4: once the provider is configured, calling the same function
/// during planning dispatches to `CallFunction` exactly once per argument
/// set (§4.5, §8 scenario 4).
#[tokio::test]
async fn provider_function_during_plan_calls_provider_once_per_argument_set() {
    init_tracing();
    let provider = Arc::new(RecordingProvider::default());
    let mut specs = BTreeMap::new();
    specs.insert(
        "arn_parse".to_string(),
        FunctionSpec {
            params: vec![FunctionParam {
                name: "arn".to_string(),
                ty: Type::String,
                allow_null: false,
                allow_unknown: false,
            }],
            variadic_param: None,
            return_type: Type::String,
        },
    );
    let bridge = FunctionBridge::for_provider(provider.clone(), specs);

    bridge
        .call("arn_parse", vec![MarkedValue::unmarked(Value::String("a".to_string()))])
        .await
        .unwrap();
    bridge
        .call("arn_parse", vec![MarkedValue::unmarked(Value::String("b".to_string()))])
        .await
        .unwrap();

    assert_eq!(provider.call_function_calls.load(Ordering::SeqCst), 2);
    let received = provider.received_call_args.lock().unwrap();
    assert_eq!(received.len(), 2);
}

/// Scenario 5: `echo(sensitive_value)` returns the value marked sensitive
/// again, while the provider itself only ever sees the bare, unmarked string
/// (§4.5, §9 "Sensitive as a side-channel", §8 scenario 5).
#[tokio::test]
async fn echo_function_round_trips_sensitive_value() {
    init_tracing();
    let provider = Arc::new(RecordingProvider::default());
    let mut specs = BTreeMap::new();
    specs.insert(
        "echo".to_string(),
        FunctionSpec {
            params: vec![FunctionParam {
                name: "value".to_string(),
                ty: Type::Dynamic,
                allow_null: false,
                allow_unknown: true,
            }],
            variadic_param: None,
            return_type: Type::Dynamic,
        },
    );
    let bridge = FunctionBridge::for_provider(provider.clone(), specs);

    let mut marks = MarkTable::new();
    marks.insert(Path::root(), std::collections::BTreeSet::from([Mark::Sensitive]));
    let sensitive_value = MarkedValue::mark_with_paths(Value::String("sensitive!".to_string()), marks);

    let result = bridge.call("echo", vec![sensitive_value]).await.unwrap();

    assert_eq!(result.value, Value::String("sensitive!".to_string()));
    assert!(result.is_sensitive());

    let received = provider.received_call_args.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], vec![Value::String("sensitive!".to_string())]);
}

/// Scenario 6: planning a `delete` for a resource whose `prevent_destroy` is
/// unknown is a hard error, never a silent allow (§4.6, §8 scenario 6).
#[test]
fn prevent_destroy_unknown_is_a_hard_error() {
    init_tracing();
    let addr = root_addr("foo");
    let err =
        check_prevent_destroy(&addr, &MarkedValue::unmarked(Value::Unknown(Type::Bool))).unwrap_err();

    assert!(matches!(err, LifecycleError::PreventDestroyUnknown(ref a) if *a == addr));
    assert!(err.to_string().starts_with("Invalid prevent_destroy value"));
}

fn test_schema() -> Schema {
    let mut attributes = BTreeMap::new();
    attributes.insert("id".to_string(), AttributeSchema::computed(Type::String));
    Schema {
        block: Block {
            attributes,
            block_types: BTreeMap::new(),
        },
        version: 1,
    }
}

fn data_source_addr(name: &str) -> ResourceInstanceAddr {
    ResourceInstanceAddr {
        config: ConfigResourceAddr {
            module: ModulePath::root(),
            mode: ResourceMode::Data,
            resource_type: "test_lookup".to_string(),
            name: name.to_string(),
        },
        key: InstanceKey::None,
    }
}

/// A provisioner that always fails, used to exercise the taint-on-fail path
/// through the real `apply_with_provisioners` entry point.
struct FailingProvisioner;

#[async_trait]
impl Provisioner for FailingProvisioner {
    async fn provision_resource(
        &self,
        _config: &Value,
        _connection: &BTreeMap<String, String>,
    ) -> Result<Diagnostics, String> {
        Err("connection refused".to_string())
    }
}

/// A create whose `on_failure = "fail"` provisioner errors out must still
/// land a tainted object through the real `apply_with_provisioners` →
/// `apply` call chain (§4.6 "Provisioners"), not just through
/// `run_create_provisioners` in isolation.
#[tokio::test]
async fn apply_with_provisioners_taints_object_on_create_provisioner_failure() {
    init_tracing();
    let addr = root_addr("foo");
    let schema = test_schema();
    let provider = RecordingProvider::default();

    let after = MarkedValue::unmarked(Value::Object(BTreeMap::from([(
        "id".to_string(),
        Value::String("abc".to_string()),
    )])));
    let change = ResourceInstanceChange {
        addr: addr.clone(),
        prev_run_addr: addr.clone(),
        action: ChangeAction::Create,
        before: None,
        after: Some(after),
        provider: test_provider_addr(),
        deposed_key: None,
        reason: ChangeReason::None,
        private: Vec::new(),
    };
    let provisioners = vec![ProvisionerSpec {
        provisioner: Arc::new(FailingProvisioner),
        config: Value::Object(BTreeMap::new()),
        connection: BTreeMap::new(),
        on_failure: OnFailure::Fail,
    }];

    let (object, diagnostics) = apply_with_provisioners(&change, &schema, &provider, &provisioners)
        .await
        .unwrap();

    let object = object.expect("a tainted object is still returned, not dropped");
    assert_eq!(object.status, ObjectStatus::Tainted);
    assert!(diagnostics.has_errors());
}

/// Scenario: a data source whose config was still unknown at plan time
/// (`ChangeReason::ReadBecauseConfigUnknown`) must be re-read for real by
/// `apply`, not carried through as the plan-time placeholder, and the
/// provider must be consulted exactly once.
#[tokio::test]
async fn apply_resolves_deferred_data_source_read() {
    init_tracing();
    let addr = data_source_addr("foo");
    let schema = test_schema();
    let provider = RecordingProvider::default();

    let config = MarkedValue::unmarked(Value::Object(BTreeMap::from([(
        "id".to_string(),
        Value::String("resolved-id".to_string()),
    )])));
    let plan_outcome = plan_data_source(
        &addr,
        "test_lookup",
        &MarkedValue::unmarked(Value::Object(BTreeMap::from([(
            "id".to_string(),
            Value::Unknown(Type::String),
        )]))),
        &schema,
        &provider,
        test_provider_addr(),
        false,
    )
    .await
    .unwrap();
    let mut change = plan_outcome.change.expect("deferred read still produces a change");
    assert_eq!(change.action, ChangeAction::Read);
    assert_eq!(change.reason, ChangeReason::ReadBecauseConfigUnknown);

    // Stand in for "every dependency resolved by apply time": swap the
    // still-unknown config stashed on `before` for the fully known one.
    change.before = Some(config);

    let (object, diagnostics) = apply(&change, &schema, &provider).await.unwrap();

    let object = object.expect("deferred read resolves to a ready object");
    assert_eq!(object.status, ObjectStatus::Ready);
    assert!(!diagnostics.has_errors());
    assert_eq!(
        object.value.value,
        Value::Object(BTreeMap::from([(
            "id".to_string(),
            Value::String("resolved-id".to_string())
        )]))
    );
}
