// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Provisioner orchestration: post-create and pre-destroy hooks that run
//! outside the provider's own CRUD contract (§4.6 "Provisioners"). Grounded
//! on `block_validator.rs`'s thin async-trait-plus-accept-all-default shape.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::addr::ResourceInstanceAddr;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::LifecycleError;
use crate::state::{ObjectStatus, ResourceInstanceObject};
use crate::value::Value;

/// What to do when a provisioner fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnFailure {
    #[default]
    Fail,
    Continue,
}

/// A single configured provisioner invocation: the provisioner itself, its
/// resolved configuration, connection info for reaching the resource, and
/// the failure policy to apply if it errors.
pub struct ProvisionerSpec {
    pub provisioner: Arc<dyn Provisioner>,
    pub config: Value,
    pub connection: BTreeMap<String, String>,
    pub on_failure: OnFailure,
}

/// The provisioner plugin contract. Distinct from `Provider`: a provisioner
/// has no schema, no CRUD lifecycle of its own, and runs purely as a side
/// effect attached to a resource's create or destroy.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision_resource(
        &self,
        config: &Value,
        connection: &BTreeMap<String, String>,
    ) -> Result<Diagnostics, String>;
}

/// Accepts any configuration and does nothing — the default when a resource
/// declares no provisioners.
pub struct NoopProvisioner;

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn provision_resource(
        &self,
        _config: &Value,
        _connection: &BTreeMap<String, String>,
    ) -> Result<Diagnostics, String> {
        Ok(Diagnostics::new())
    }
}

/// The outcome of a failed provisioner run where `on_failure = "fail"`: the
/// object is tainted (kept in state, not rolled back) but the apply as a
/// whole still reports a hard error, so the caller must persist `object`
/// before propagating `error` (§4.6 "Provisioners").
pub struct ProvisionerFailure {
    pub object: ResourceInstanceObject,
    pub error: LifecycleError,
}

/// Runs the configured provisioners for a resource that was just created,
/// in order, before the object is marked `ready` (§4.6). On the first
/// `on_failure = "fail"` provisioner error, stops running further
/// provisioners and taints the object. `on_failure = "continue"` logs a
/// warning diagnostic and proceeds to the next provisioner.
pub async fn run_create_provisioners(
    addr: &ResourceInstanceAddr,
    mut object: ResourceInstanceObject,
    provisioners: &[ProvisionerSpec],
) -> Result<(ResourceInstanceObject, Diagnostics), ProvisionerFailure> {
    let mut diagnostics = Diagnostics::new();
    for spec in provisioners {
        match spec.provisioner.provision_resource(&spec.config, &spec.connection).await {
            Ok(diags) => diagnostics.extend(diags),
            Err(message) => match spec.on_failure {
                OnFailure::Fail => {
                    object.status = ObjectStatus::Tainted;
                    return Err(ProvisionerFailure {
                        object,
                        error: LifecycleError::ProvisionerFailed(addr.clone(), message),
                    });
                }
                OnFailure::Continue => {
                    diagnostics.push(Diagnostic::warning(
                        format!("provisioner for {addr} failed"),
                        format!("{message} (on_failure = \"continue\"; apply proceeds)"),
                    ));
                }
            },
        }
    }
    Ok((object, diagnostics))
}

/// Runs destroy-time provisioners before the provider's delete call (§4.6).
/// Any failure aborts the destroy entirely, leaving `object` untouched and
/// still `ready` — the caller must not proceed to `plan_destroy`/apply the
/// delete when this returns `Err`.
pub async fn run_destroy_provisioners(
    addr: &ResourceInstanceAddr,
    provisioners: &[ProvisionerSpec],
) -> Result<Diagnostics, LifecycleError> {
    let mut diagnostics = Diagnostics::new();
    for spec in provisioners {
        match spec.provisioner.provision_resource(&spec.config, &spec.connection).await {
            Ok(diags) => diagnostics.extend(diags),
            Err(message) => {
                return Err(LifecycleError::ProvisionerFailed(addr.clone(), message));
            }
        }
    }
    Ok(diagnostics)
}
