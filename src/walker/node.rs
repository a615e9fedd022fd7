// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! The capability set every graph node exposes (§9 "deep inheritance of node
//! types"): identity, module path, upstream dependencies, and an executor.
//! Lifecycle-specific behavior composes this trait rather than subclassing an
//! abstract instance the way the source's node hierarchy does; concrete node
//! types (plan a resource, evaluate an output, run a provisioner, ...) are
//! built by whatever constructs the graph, outside this core.

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::addr::ModulePath;
use crate::diagnostics::Diagnostics;
use crate::walk_op::WalkOp;

use super::context::WalkContext;

/// Opaque node identity assigned by whoever builds the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// The result of executing one node. `halted` is reserved for cooperative
/// cancellation (§4.7 step 3); a node skipped because an upstream dependency
/// failed is a separate bookkeeping decision the walker makes itself and
/// never reaches `execute` at all.
#[derive(Debug, Default)]
pub struct NodeOutcome {
    pub diagnostics: Diagnostics,
    pub halted: bool,
}

impl NodeOutcome {
    pub fn ok(diagnostics: Diagnostics) -> Self {
        NodeOutcome {
            diagnostics,
            halted: false,
        }
    }

    pub fn halted() -> Self {
        NodeOutcome {
            diagnostics: Diagnostics::new(),
            halted: true,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.halted || self.diagnostics.has_errors()
    }
}

#[async_trait]
pub trait GraphNode: Send + Sync {
    fn id(&self) -> NodeId;

    fn module_path(&self) -> &ModulePath;

    /// Node ids that must complete before this node is ready to run. Ids
    /// outside the walked graph (e.g. pruned by targeting) are simply
    /// ignored by the walker.
    fn dependencies(&self) -> &[NodeId];

    async fn execute(&self, cx: &WalkContext, op: WalkOp, cancel: &CancellationToken) -> NodeOutcome;
}
