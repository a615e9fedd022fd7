// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Layered error types: one `thiserror`-derived enum per component, composed
//! into a single top-level error for callers that don't care which layer
//! failed.

use thiserror::Error;

use crate::addr::{DeposedKey, ProviderAddr, ResourceInstanceAddr};
use crate::value::conformance::ConformanceError;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("resource instance {0} has no current object")]
    NoCurrentObject(ResourceInstanceAddr),
    #[error("resource instance {0} has no deposed object {1}")]
    NoDeposedObject(ResourceInstanceAddr, DeposedKey),
    #[error("output {0} is not declared in this module")]
    UndeclaredOutput(String),
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("reference to undeclared {kind} {name:?}")]
    Undeclared { kind: &'static str, name: String },
    #[error("unparsable reference: {0}")]
    UnparsableReference(String),
    #[error("function {0:?} not found in provider")]
    FunctionNotFoundInProvider(String),
    #[error("function {name:?} argument {index} invalid: {message}")]
    FunctionArgument {
        name: String,
        index: usize,
        message: String,
    },
    #[error("sensitive value may not be used here: {0}")]
    DisallowedSensitive(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider factory failed for {0}: {1}")]
    FactoryFailed(ProviderAddr, String),
    #[error("provider {0} returned a value that does not conform to its schema: {1:?}")]
    ProviderBug(ProviderAddr, Vec<ConformanceError>),
    #[error("provider {0} returned an error: {1}")]
    Remote(ProviderAddr, String),
    #[error("provider {0} has no function named {1:?}")]
    FunctionNotFound(ProviderAddr, String),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("resource {0} has prevent_destroy set and a destroy was planned")]
    PreventDestroy(ResourceInstanceAddr),
    #[error("Invalid prevent_destroy value: {0} has an unknown prevent_destroy value and cannot be planned for destruction")]
    PreventDestroyUnknown(ResourceInstanceAddr),
    #[error("Invalid prevent_destroy value: {0} has a null prevent_destroy value and cannot be planned for destruction")]
    PreventDestroyNull(ResourceInstanceAddr),
    #[error("provider plan for {0} is inconsistent with configuration: {1}")]
    PlannedInconsistency(ResourceInstanceAddr, String),
    #[error("provider apply for {0} is inconsistent with the plan: {1}")]
    ApplyInconsistency(ResourceInstanceAddr, String),
    #[error("provisioner for {0} failed: {1}")]
    ProvisionerFailed(ResourceInstanceAddr, String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("walk was cancelled")]
    Cancelled,
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Walk(#[from] WalkError),
}
