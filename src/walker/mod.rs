// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! The graph walker: traverses a dependency graph for one operation, running
//! ready nodes under a bounded-parallelism semaphore and halting only the
//! descendants of a node that fails fatally (§4.7).
//!
//! Building the graph itself — expanding `count`/`for_each` into instances,
//! wiring references into edges, resolving import/remove targets — is the
//! configuration front-end's job; this core only traverses what it is
//! handed, the same boundary `addr::ResourceInstanceAddr::from_str` draws
//! around HCL-aware parsing.

pub mod context;
pub mod hooks;
pub mod node;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use context::{EvalContextCache, WalkContext};
pub use hooks::{Hooks, NoopHooks};
pub use node::{GraphNode, NodeId, NodeOutcome};

use crate::changes::ChangesStore;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::eval::EvalContext;
use crate::provider::ProviderRegistry;
use crate::state::StateStore;
use crate::walk_op::WalkOp;

/// An immutable dependency graph: one node per unit of work, with upstream
/// dependency ids embedded in each node.
#[derive(Default)]
pub struct Graph {
    nodes: HashMap<NodeId, Arc<dyn GraphNode>>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn add_node(&mut self, node: Arc<dyn GraphNode>) {
        self.nodes.insert(node.id(), node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Per-walk knobs the walker itself controls. Targeting/excluding is
/// expressed in already-resolved node ids — resolving a `-target` address
/// string to the node(s) it names is, again, the graph builder's job.
#[derive(Clone)]
pub struct WalkOptions {
    pub parallelism: usize,
    pub targets: Option<HashSet<NodeId>>,
    pub excludes: HashSet<NodeId>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            parallelism: 10,
            targets: None,
            excludes: HashSet::new(),
        }
    }
}

pub struct WalkOutcome {
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
    pub state: Arc<StateStore>,
    pub changes: Arc<ChangesStore>,
}

/// Drives one traversal of a dependency graph. Stateless beyond its
/// cancellation token, so a single `GraphWalker` corresponds to exactly one
/// walk — call `stop()` from another task to request cancellation of `run`.
pub struct GraphWalker {
    cancel: CancellationToken,
}

impl Default for GraphWalker {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphWalker {
    pub fn new() -> Self {
        GraphWalker {
            cancel: CancellationToken::new(),
        }
    }

    /// Requests cooperative cancellation (§4.7 step 3, §5 "Cancellation").
    /// Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Walks `graph` once for operation `op`.
    ///
    /// `prior_state` seeds the walk's state store: `Validate` always starts
    /// fresh regardless of what is passed; every other operation deep-copies
    /// it (or starts fresh if there is none), so mutations made by an
    /// abandoned attempt are never observed (§4.7 step 1).
    pub async fn run(
        &self,
        graph: &Graph,
        base_eval_context: EvalContext,
        providers: Arc<ProviderRegistry>,
        prior_state: Option<Arc<StateStore>>,
        op: WalkOp,
        options: WalkOptions,
        hooks: Arc<dyn Hooks>,
    ) -> WalkOutcome {
        let state = if op.is_validate() {
            StateStore::new()
        } else {
            prior_state.map(|s| s.deep_clone()).unwrap_or_else(StateStore::new)
        };
        state.discard_check_results();
        let changes = ChangesStore::new();

        // The caller's `EvalContext` is a template for variable declarations,
        // the function bridge, and workspace/timestamp metadata; its state
        // and changes handles are rebound to this walk's own copies so every
        // node observes exactly the state this walk owns, never whatever
        // store the template happened to be built against.
        let mut eval_context = base_eval_context;
        eval_context.state = state.clone();
        eval_context.changes = changes.clone();
        eval_context.walk_op = op;

        let cx = Arc::new(WalkContext {
            state: state.clone(),
            changes: changes.clone(),
            providers: providers.clone(),
            eval_contexts: Arc::new(EvalContextCache::new(eval_context)),
            op,
        });

        // Best-effort cancellation watcher: issues `Stop` to every provider
        // constructed so far as soon as `stop()` fires (§4.7 step 3, §5).
        let watcher_cancel = self.cancel.clone();
        let watcher_providers = providers.clone();
        let watcher = tokio::spawn(async move {
            watcher_cancel.cancelled().await;
            watcher_providers.stop_all().await;
        });

        let mut diagnostics = Diagnostics::new();

        let active: HashSet<NodeId> = graph
            .nodes
            .keys()
            .copied()
            .filter(|id| {
                options.targets.as_ref().map_or(true, |t| t.contains(id)) && !options.excludes.contains(id)
            })
            .collect();

        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        for &id in &active {
            let deps: Vec<NodeId> = graph.nodes[&id]
                .dependencies()
                .iter()
                .copied()
                .filter(|d| active.contains(d))
                .collect();
            in_degree.insert(id, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut ready: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut remaining = active.len();
        let mut failed: HashSet<NodeId> = HashSet::new();
        let mut pending_resolutions: VecDeque<(NodeId, bool)> = VecDeque::new();

        let semaphore = Arc::new(Semaphore::new(options.parallelism.max(1)));
        let mut in_flight: JoinSet<(NodeId, NodeOutcome)> = JoinSet::new();

        while remaining > 0 {
            while let Some((id, node_failed)) = pending_resolutions.pop_front() {
                remaining -= 1;
                if node_failed {
                    failed.insert(id);
                }
                if let Some(deps) = dependents.get(&id) {
                    for &dep in deps {
                        let counter = in_degree.get_mut(&dep).expect("dependent is tracked");
                        *counter -= 1;
                        if *counter == 0 {
                            let ancestor_failed =
                                graph.nodes[&dep].dependencies().iter().any(|d| failed.contains(d));
                            if ancestor_failed {
                                let outcome = NodeOutcome::ok(Diagnostics(vec![Diagnostic::warning(
                                    format!("{dep} skipped"),
                                    "an upstream node in its dependency chain failed",
                                )]));
                                hooks.after_node(dep, &outcome);
                                diagnostics.extend(outcome.diagnostics);
                                pending_resolutions.push_back((dep, true));
                            } else {
                                ready.push_back(dep);
                            }
                        }
                    }
                }
            }

            if remaining == 0 {
                break;
            }
            if ready.is_empty() && in_flight.is_empty() {
                diagnostics.push(Diagnostic::error(
                    "graph walk stalled",
                    format!(
                        "{remaining} node(s) never became ready; this indicates a cycle or a \
                         dependency outside the walked set"
                    ),
                ));
                break;
            }

            while let Some(id) = ready.pop_front() {
                let node = graph.nodes[&id].clone();
                let cx = cx.clone();
                let cancel = self.cancel.clone();
                let permit = semaphore.clone();
                let hooks = hooks.clone();
                in_flight.spawn(async move {
                    let _permit = permit.acquire_owned().await.expect("semaphore is never closed");
                    hooks.before_node(id);
                    let outcome = if cancel.is_cancelled() {
                        NodeOutcome::halted()
                    } else {
                        node.execute(&cx, op, &cancel).await
                    };
                    (id, outcome)
                });
            }

            if let Some(join_result) = in_flight.join_next().await {
                let (id, outcome) = join_result.expect("node task panicked");
                hooks.after_node(id, &outcome);
                let fatal = outcome.is_fatal();
                diagnostics.extend(outcome.diagnostics);
                pending_resolutions.push_back((id, fatal));
            }
        }

        watcher.abort();
        providers.close_all().await;

        WalkOutcome {
            diagnostics,
            cancelled: self.cancel.is_cancelled(),
            state,
            changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::ModulePath;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TestNode {
        id: NodeId,
        deps: Vec<NodeId>,
        module: ModulePath,
        log: Option<Arc<Mutex<Vec<NodeId>>>>,
        fail: bool,
        concurrency: Option<(Arc<AtomicUsize>, Arc<AtomicUsize>)>,
    }

    impl TestNode {
        fn new(id: u64, deps: &[u64]) -> Self {
            TestNode {
                id: NodeId(id),
                deps: deps.iter().map(|d| NodeId(*d)).collect(),
                module: ModulePath::root(),
                log: None,
                fail: false,
                concurrency: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl GraphNode for TestNode {
        fn id(&self) -> NodeId {
            self.id
        }
        fn module_path(&self) -> &ModulePath {
            &self.module
        }
        fn dependencies(&self) -> &[NodeId] {
            &self.deps
        }
        async fn execute(&self, _cx: &WalkContext, _op: WalkOp, _cancel: &CancellationToken) -> NodeOutcome {
            if let Some((current, peak)) = &self.concurrency {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }
            if let Some(log) = &self.log {
                log.lock().unwrap().push(self.id);
            }
            if self.fail {
                NodeOutcome::ok(Diagnostics(vec![Diagnostic::error("boom", "intentional test failure")]))
            } else {
                NodeOutcome::ok(Diagnostics::new())
            }
        }
    }

    fn base_eval_context() -> EvalContext {
        EvalContext::new(
            StateStore::new(),
            ChangesStore::new(),
            WalkOp::Plan,
            "default",
            Arc::new(crate::provider::FunctionBridge::placeholder()),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn executes_nodes_in_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new();
        graph.add_node(Arc::new(TestNode {
            log: Some(log.clone()),
            ..TestNode::new(1, &[])
        }));
        graph.add_node(Arc::new(TestNode {
            log: Some(log.clone()),
            ..TestNode::new(2, &[])
        }));
        graph.add_node(Arc::new(TestNode {
            log: Some(log.clone()),
            ..TestNode::new(3, &[1, 2])
        }));

        let walker = GraphWalker::new();
        let outcome = walker
            .run(
                &graph,
                base_eval_context(),
                ProviderRegistry::new(),
                None,
                WalkOp::Plan,
                WalkOptions::default(),
                Arc::new(NoopHooks),
            )
            .await;

        assert!(!outcome.diagnostics.has_errors());
        let order = log.lock().unwrap().clone();
        let pos = |id: u64| order.iter().position(|n| n.0 == id).unwrap();
        assert!(pos(3) > pos(1));
        assert!(pos(3) > pos(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fatal_error_halts_only_its_descendants() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new();
        graph.add_node(Arc::new(TestNode {
            fail: true,
            ..TestNode::new(1, &[])
        }));
        graph.add_node(Arc::new(TestNode {
            log: Some(log.clone()),
            ..TestNode::new(2, &[1])
        }));
        graph.add_node(Arc::new(TestNode {
            log: Some(log.clone()),
            ..TestNode::new(3, &[])
        }));

        let walker = GraphWalker::new();
        let outcome = walker
            .run(
                &graph,
                base_eval_context(),
                ProviderRegistry::new(),
                None,
                WalkOp::Plan,
                WalkOptions::default(),
                Arc::new(NoopHooks),
            )
            .await;

        assert!(outcome.diagnostics.has_errors());
        let executed = log.lock().unwrap().clone();
        assert!(!executed.contains(&NodeId(2)), "node 2 depends on the failed node and must not run");
        assert!(executed.contains(&NodeId(3)), "node 3 is unrelated and must still run");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallelism_is_bounded_by_the_semaphore() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new();
        for i in 0..8 {
            graph.add_node(Arc::new(TestNode {
                concurrency: Some((current.clone(), peak.clone())),
                ..TestNode::new(i, &[])
            }));
        }

        let walker = GraphWalker::new();
        let mut options = WalkOptions::default();
        options.parallelism = 2;
        walker
            .run(
                &graph,
                base_eval_context(),
                ProviderRegistry::new(),
                None,
                WalkOp::Plan,
                options,
                Arc::new(NoopHooks),
            )
            .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn stop_causes_unstarted_nodes_to_halt() {
        let mut graph = Graph::new();
        graph.add_node(Arc::new(TestNode::new(1, &[])));

        let walker = GraphWalker::new();
        walker.stop();
        let outcome = walker
            .run(
                &graph,
                base_eval_context(),
                ProviderRegistry::new(),
                None,
                WalkOp::Plan,
                WalkOptions::default(),
                Arc::new(NoopHooks),
            )
            .await;

        assert!(outcome.cancelled);
    }
}
