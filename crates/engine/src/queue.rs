//! Dependency-aware ready-set over an execution plan.
//!
//! The queue tracks every *scheduled* node of the plan through the disjoint
//! states pending → in-progress → {completed | failed | skipped} and emits
//! batches of nodes whose dependencies have all resolved. Skip propagation
//! runs inside [`ExecutionQueue::next_batch`] until a fixed point, so nodes
//! reachable only through failed-without-error-port (or fully skipped)
//! dependencies never surface as ready.
//!
//! The executor calls the queue from its single orchestration task; it is
//! deliberately not synchronized.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::plan::ExecutionPlan;

/// Mutable scheduling state for one execution.
pub struct ExecutionQueue {
    plan: Arc<ExecutionPlan>,
    pending: HashSet<String>,
    in_progress: HashSet<String>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    skipped: HashSet<String>,
}

impl ExecutionQueue {
    /// Every scheduled node starts out pending. Retained-but-unscheduled
    /// nodes are not tracked; the executor reports them separately.
    pub fn new(plan: Arc<ExecutionPlan>) -> Self {
        let pending: HashSet<String> = plan.level_of.keys().cloned().collect();
        Self {
            plan,
            pending,
            in_progress: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            skipped: HashSet::new(),
        }
    }

    /// Whether any node is still pending or running.
    pub fn has_work(&self) -> bool {
        !self.pending.is_empty() || !self.in_progress.is_empty()
    }

    /// Whether every tracked node reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.in_progress.is_empty()
    }

    /// Complete with no failures.
    pub fn is_successful(&self) -> bool {
        self.is_complete() && self.failed.is_empty()
    }

    /// Percentage of nodes in a terminal state, in `[0, 100]`.
    pub fn progress(&self) -> u8 {
        let total = self.pending.len()
            + self.in_progress.len()
            + self.completed.len()
            + self.failed.len()
            + self.skipped.len();
        if total == 0 {
            return 100;
        }
        let done = self.completed.len() + self.failed.len() + self.skipped.len();
        ((done * 100) / total) as u8
    }

    /// The next set of ready nodes, in plan-level order with lexicographic
    /// tie-break. Applies skip propagation to a fixed point first; an empty
    /// batch with `has_work()` still true means the execution is blocked.
    pub fn next_batch(&mut self) -> Vec<String> {
        loop {
            let mut ready: Vec<String> = Vec::new();
            let mut newly_skipped: Vec<String> = Vec::new();

            for id in &self.pending {
                match self.classify(id) {
                    Readiness::Waiting => {}
                    Readiness::Ready => ready.push(id.clone()),
                    Readiness::Skip => newly_skipped.push(id.clone()),
                }
            }

            if newly_skipped.is_empty() {
                ready.sort_by_key(|id| (self.plan.level_of(id), id.clone()));
                return ready;
            }
            for id in newly_skipped {
                debug!(node_id = %id, "skip propagated");
                self.pending.remove(&id);
                self.skipped.insert(id);
            }
        }
    }

    /// Move a batch from pending to in-progress.
    pub fn mark_in_progress(&mut self, ids: &[String]) {
        for id in ids {
            if self.pending.remove(id) {
                self.in_progress.insert(id.clone());
            }
        }
    }

    /// Terminal: the node produced a successful result.
    pub fn mark_completed(&mut self, id: &str) {
        if self.in_progress.remove(id) || self.pending.remove(id) {
            self.completed.insert(id.to_string());
        }
    }

    /// Terminal: the node failed.
    pub fn mark_failed(&mut self, id: &str) {
        if self.in_progress.remove(id) || self.pending.remove(id) {
            self.failed.insert(id.to_string());
        }
    }

    /// Terminal: the node will never run. Only pending nodes can be
    /// skipped; ids in other states (or not tracked) are left alone.
    pub fn mark_skipped(&mut self, id: &str) {
        if self.pending.remove(id) {
            self.skipped.insert(id.to_string());
        }
    }

    /// Sorted view of the completed set.
    pub fn completed_ids(&self) -> Vec<String> {
        sorted(&self.completed)
    }

    /// Sorted view of the failed set.
    pub fn failed_ids(&self) -> Vec<String> {
        sorted(&self.failed)
    }

    /// Sorted view of the skipped set.
    pub fn skipped_ids(&self) -> Vec<String> {
        sorted(&self.skipped)
    }

    /// Sorted view of the pending set.
    pub fn pending_ids(&self) -> Vec<String> {
        sorted(&self.pending)
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.contains(id)
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.failed.contains(id)
    }

    pub fn is_skipped(&self, id: &str) -> bool {
        self.skipped.contains(id)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn classify(&self, id: &str) -> Readiness {
        let Some(node) = self.plan.node(id) else {
            return Readiness::Skip;
        };

        // A dependency path is "live" when it actually delivered: the dep
        // completed, or failed through an error port (its error-port
        // dependents stay eligible). A merge is ready with one live path
        // even if the others were skipped.
        let mut live = node.dependencies.is_empty();
        for dep in &node.dependencies {
            if !self.plan.nodes.contains_key(dep) {
                // Filtered during build; treat as resolved.
                live = true;
                continue;
            }
            if self.completed.contains(dep) {
                live = true;
            } else if self.failed.contains(dep) {
                let dep_has_port = self
                    .plan
                    .node(dep)
                    .map(|n| n.has_error_port)
                    .unwrap_or(false);
                if !dep_has_port {
                    return Readiness::Skip;
                }
                live = true;
            } else if self.skipped.contains(dep) {
                // Resolved, but not a live path.
            } else {
                return Readiness::Waiting;
            }
        }

        if live {
            Readiness::Ready
        } else {
            Readiness::Skip
        }
    }
}

enum Readiness {
    Waiting,
    Ready,
    Skip,
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut ids: Vec<String> = set.iter().cloned().collect();
    ids.sort();
    ids
}
