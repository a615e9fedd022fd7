// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! The graph walker and evaluation core for a declarative infrastructure
//! engine: the value model, schema/conformance checking, state and changes
//! storage, the expression evaluator, the provider plugin boundary, the
//! resource lifecycle engine, and the graph walker that ties them together
//! (§1-§4.7).
//!
//! Building a dependency [`walker::Graph`] from a configuration tree —
//! parsing HCL, expanding `count`/`for_each` into instances, wiring
//! references into edges — is a configuration front-end's job and stays
//! outside this core, the same boundary drawn around the out-of-process
//! provider wire format (`provider::Provider`).

pub mod addr;
pub mod changes;
pub mod diagnostics;
pub mod error;
pub mod eval;
pub mod lifecycle;
pub mod provider;
pub mod schema;
pub mod state;
pub mod value;
pub mod walk_op;
pub mod walker;

use std::sync::Arc;

pub use error::CoreError;
pub use walk_op::WalkOp;

use diagnostics::Diagnostics;
use eval::{EvalContext, Scope};
use provider::ProviderRegistry;
use state::StateStore;
use walker::{Graph, GraphWalker, Hooks, WalkOptions};

/// Outcome of a `Validate` walk: no state is produced or consumed.
pub struct ValidateResult {
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
}

/// Outcome of a `Plan`/`Plan -destroy` walk: the refreshed state observed
/// during planning, and the changes planned against it. Nothing here is
/// persisted until `apply` runs against the same `changes` (§6 "a plan
/// record").
pub struct PlanResult {
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
    pub refreshed_state: Arc<StateStore>,
    pub changes: Arc<changes::ChangesStore>,
}

/// Outcome of an `Apply`/`Destroy` walk: the new state to persist.
pub struct ApplyResult {
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
    pub new_state: Arc<StateStore>,
}

/// Outcome of an `Import` walk: the new state plus the generated changes
/// (carrying any generated-config snippets, per `lifecycle::plan_import`).
pub struct ImportResult {
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
    pub new_state: Arc<StateStore>,
    pub changes: Arc<changes::ChangesStore>,
}

/// Outcome of an `Eval` walk: everything needed to evaluate further, ad hoc
/// expressions afterward (the `terraform console` use case) — a `Scope` plus
/// an `EvalContext` bound to the state this walk produced (§6).
pub struct EvalResult {
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
    pub context: EvalContext,
    pub scope: Scope,
}

/// The five public operations plus `Stop`, each a thin wrapper around one
/// [`GraphWalker::run`] call with the operation's [`WalkOp`] and result
/// shape. Callers that need `Stop` to interrupt a running operation hold on
/// to the `GraphWalker` they pass in (`GraphWalker` clones share one
/// cancellation token) and call [`GraphWalker::stop`] from another task.
pub struct Core;

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

impl Core {
    pub fn new() -> Self {
        Core
    }

    pub async fn validate(
        &self,
        walker: &GraphWalker,
        graph: &Graph,
        base_eval_context: EvalContext,
        providers: Arc<ProviderRegistry>,
        options: WalkOptions,
        hooks: Arc<dyn Hooks>,
    ) -> ValidateResult {
        let outcome = walker
            .run(graph, base_eval_context, providers, None, WalkOp::Validate, options, hooks)
            .await;
        ValidateResult {
            diagnostics: outcome.diagnostics,
            cancelled: outcome.cancelled,
        }
    }

    pub async fn plan(
        &self,
        walker: &GraphWalker,
        graph: &Graph,
        base_eval_context: EvalContext,
        providers: Arc<ProviderRegistry>,
        prior_state: Option<Arc<StateStore>>,
        destroy: bool,
        options: WalkOptions,
        hooks: Arc<dyn Hooks>,
    ) -> PlanResult {
        let op = if destroy { WalkOp::PlanDestroy } else { WalkOp::Plan };
        let outcome = walker
            .run(graph, base_eval_context, providers, prior_state, op, options, hooks)
            .await;
        PlanResult {
            diagnostics: outcome.diagnostics,
            cancelled: outcome.cancelled,
            refreshed_state: outcome.state,
            changes: outcome.changes,
        }
    }

    pub async fn apply(
        &self,
        walker: &GraphWalker,
        graph: &Graph,
        base_eval_context: EvalContext,
        providers: Arc<ProviderRegistry>,
        prior_state: Option<Arc<StateStore>>,
        destroy: bool,
        options: WalkOptions,
        hooks: Arc<dyn Hooks>,
    ) -> ApplyResult {
        let op = if destroy { WalkOp::Destroy } else { WalkOp::Apply };
        let outcome = walker
            .run(graph, base_eval_context, providers, prior_state, op, options, hooks)
            .await;
        ApplyResult {
            diagnostics: outcome.diagnostics,
            cancelled: outcome.cancelled,
            new_state: outcome.state,
        }
    }

    pub async fn import(
        &self,
        walker: &GraphWalker,
        graph: &Graph,
        base_eval_context: EvalContext,
        providers: Arc<ProviderRegistry>,
        prior_state: Option<Arc<StateStore>>,
        options: WalkOptions,
        hooks: Arc<dyn Hooks>,
    ) -> ImportResult {
        let outcome = walker
            .run(graph, base_eval_context, providers, prior_state, WalkOp::Import, options, hooks)
            .await;
        ImportResult {
            diagnostics: outcome.diagnostics,
            cancelled: outcome.cancelled,
            new_state: outcome.state,
            changes: outcome.changes,
        }
    }

    pub async fn eval(
        &self,
        walker: &GraphWalker,
        graph: &Graph,
        base_eval_context: EvalContext,
        providers: Arc<ProviderRegistry>,
        prior_state: Option<Arc<StateStore>>,
        scope: Scope,
        options: WalkOptions,
        hooks: Arc<dyn Hooks>,
    ) -> EvalResult {
        let template = base_eval_context.clone();
        let outcome = walker
            .run(graph, base_eval_context, providers, prior_state, WalkOp::Eval, options, hooks)
            .await;
        let mut context = template;
        context.state = outcome.state;
        context.changes = outcome.changes;
        context.walk_op = WalkOp::Eval;
        EvalResult {
            diagnostics: outcome.diagnostics,
            cancelled: outcome.cancelled,
            context,
            scope,
        }
    }
}
