//! The compiled execution plan — immutable once built.

use std::collections::HashMap;

use nodes::OutputMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// How an edge participates in execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// Plain data dependency.
    Data,
    /// Route port of a conditional/router/switch node.
    Control,
    /// The source node's error port.
    Error,
    /// Back-edge to a loop start; excluded from the dependency graph.
    LoopBack,
}

/// A classified edge retained in the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub source_port: Option<String>,
    pub target_port: Option<String>,
    pub kind: EdgeKind,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A node as the executor sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableNode {
    pub id: String,
    pub node_type: String,
    pub name: String,
    pub config: OutputMap,
    /// Ids of nodes whose resolution gates this one (non-loop-back edges,
    /// scheduled endpoints only, sorted).
    pub dependencies: Vec<String>,
    /// Ids of nodes gated on this one (sorted).
    pub dependents: Vec<String>,
    /// Whether failures route through a distinguished error port.
    pub has_error_port: bool,
    /// Whether completion of this node terminates its branch and feeds the
    /// final outputs.
    pub is_terminal: bool,
    /// Id of the innermost enclosing loop-start, if any.
    pub loop_boundary: Option<String>,
    /// Id of the innermost enclosing parallel-start, if any.
    pub parallel_boundary: Option<String>,
}

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// The compiled artifact the queue and executor consume. Structurally
/// identical output is guaranteed for identical definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Id of the definition this plan was compiled from.
    pub workflow_id: Uuid,
    /// The resolved entry node.
    pub entry_node_id: String,
    /// Every retained node, keyed by id (including unscheduled ones).
    pub nodes: HashMap<String, ExecutableNode>,
    /// BFS-layered topological levels over the scheduled nodes; each level
    /// is sorted lexicographically.
    pub levels: Vec<Vec<String>>,
    /// Level index per scheduled node id.
    pub level_of: HashMap<String, usize>,
    /// Classified edges (excluding edges dropped during build).
    pub edges: Vec<PlanEdge>,
    /// Non-fatal observations from the build, in emission order.
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    /// Look up a node.
    pub fn node(&self, id: &str) -> Option<&ExecutableNode> {
        self.nodes.get(id)
    }

    /// Level index of a scheduled node.
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.level_of.get(id).copied()
    }

    /// Whether the node participates in the level schedule. Retained but
    /// unreachable nodes are in the plan yet never scheduled.
    pub fn is_scheduled(&self, id: &str) -> bool {
        self.level_of.contains_key(id)
    }

    /// Ids of retained nodes left out of the schedule, sorted.
    pub fn unscheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .keys()
            .filter(|id| !self.is_scheduled(id))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// All edges leaving `source`.
    pub fn edges_from<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a PlanEdge> {
        self.edges.iter().filter(move |e| e.source == source)
    }

    /// All edges from `source` to `target`.
    pub fn edges_between<'a>(
        &'a self,
        source: &'a str,
        target: &'a str,
    ) -> impl Iterator<Item = &'a PlanEdge> {
        self.edges_from(source).filter(move |e| e.target == target)
    }

    /// Scheduled terminal node ids, sorted.
    pub fn terminal_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.is_terminal && self.is_scheduled(&n.id))
            .map(|n| n.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Scheduled nodes with no dependents, sorted. Used for final outputs
    /// when no typed terminal node completed.
    pub fn leaf_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.dependents.is_empty() && self.is_scheduled(&n.id))
            .map(|n| n.id.clone())
            .collect();
        ids.sort();
        ids
    }
}
