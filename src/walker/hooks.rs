// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! Observer hooks the walker calls around node execution, splitting the
//! scheduler from whoever is watching progress. The walker calls the
//! observer directly rather than feeding an output channel, since there is
//! no downstream consumer that needs the notifications buffered.

use super::node::{NodeId, NodeOutcome};

pub trait Hooks: Send + Sync {
    fn before_node(&self, _id: NodeId) {}
    fn after_node(&self, _id: NodeId, _outcome: &NodeOutcome) {}
}

/// A hook implementation that does nothing, for walks nobody needs to watch.
#[derive(Default)]
pub struct NoopHooks;

impl Hooks for NoopHooks {}
