//! Shared execution substrate: node outputs, workflow variables, and
//! loop/parallel scopes.
//!
//! The orchestrator task owns the manager exclusively; handlers only ever
//! see the immutable [`ContextSnapshot`] it produces. Output entries are
//! bounded in serialized size (oversized entries are replaced by a
//! truncation sentinel), and entries no longer referenced by any pending
//! node are pruned between batches to bound live memory.

use std::collections::{HashMap, HashSet};

use nodes::{ContextSnapshot, LoopScope, OutputMap, ParallelScope};
use serde_json::Value;
use tracing::{debug, warn};

/// Default per-node cap on the serialized output size, in bytes.
pub const DEFAULT_OUTPUT_CAP: usize = 100_000;

/// Bytes of serialized output preserved in the truncation sentinel.
pub const TRUNCATION_PREVIEW_BYTES: usize = 1_000;

/// Per-execution mutable context.
pub struct ContextManager {
    inputs: OutputMap,
    node_outputs: HashMap<String, OutputMap>,
    variables: OutputMap,
    loop_stack: Vec<LoopScope>,
    parallel_stack: Vec<ParallelScope>,
    output_cap: usize,
}

impl ContextManager {
    /// A fresh context over the workflow inputs.
    pub fn new(inputs: OutputMap) -> Self {
        Self {
            inputs,
            node_outputs: HashMap::new(),
            variables: OutputMap::new(),
            loop_stack: Vec::new(),
            parallel_stack: Vec::new(),
            output_cap: DEFAULT_OUTPUT_CAP,
        }
    }

    /// Override the serialized-size cap (tests mostly).
    pub fn with_output_cap(mut self, cap: usize) -> Self {
        self.output_cap = cap;
        self
    }

    // -----------------------------------------------------------------------
    // Node outputs
    // -----------------------------------------------------------------------

    /// Store a node's output, applying the truncation rule.
    pub fn set_node_output(&mut self, node_id: impl Into<String>, output: OutputMap) {
        let node_id = node_id.into();
        let serialized = serde_json::to_string(&output).unwrap_or_default();
        let stored = if serialized.len() > self.output_cap {
            warn!(
                node_id = %node_id,
                size = serialized.len(),
                cap = self.output_cap,
                "node output exceeds cap; storing truncation sentinel"
            );
            truncation_sentinel(&serialized)
        } else {
            output
        };
        self.node_outputs.insert(node_id, stored);
    }

    pub fn get_node_output(&self, node_id: &str) -> Option<&OutputMap> {
        self.node_outputs.get(node_id)
    }

    pub fn has_node_output(&self, node_id: &str) -> bool {
        self.node_outputs.contains_key(node_id)
    }

    /// Drop every output whose node id is absent from `still_needed`.
    pub fn prune_unused_outputs(&mut self, still_needed: &HashSet<String>) {
        let before = self.node_outputs.len();
        self.node_outputs.retain(|id, _| still_needed.contains(id));
        let dropped = before - self.node_outputs.len();
        if dropped > 0 {
            debug!(dropped, "pruned node outputs no longer referenced");
        }
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn delete_variable(&mut self, name: &str) {
        self.variables.remove(name);
    }

    // -----------------------------------------------------------------------
    // Scopes
    // -----------------------------------------------------------------------

    /// Push a loop scope on entering a loop boundary.
    pub fn enter_loop(
        &mut self,
        loop_id: impl Into<String>,
        index: usize,
        item: Value,
        total: Option<usize>,
    ) {
        self.loop_stack.push(LoopScope {
            loop_id: loop_id.into(),
            index,
            item,
            total,
        });
    }

    /// Advance the innermost loop scope to a new iteration. A stray call
    /// outside any loop is ignored.
    pub fn update_loop_iteration(&mut self, index: usize, item: Value) {
        match self.loop_stack.last_mut() {
            Some(scope) => {
                scope.index = index;
                scope.item = item;
            }
            None => warn!("update_loop_iteration called outside a loop scope"),
        }
    }

    /// Pop the innermost loop scope on leaving the boundary.
    pub fn exit_loop(&mut self) -> Option<LoopScope> {
        self.loop_stack.pop()
    }

    /// Push a parallel scope on entering a parallel boundary.
    pub fn enter_parallel(&mut self, parallel_id: impl Into<String>, branch_index: usize) {
        self.parallel_stack.push(ParallelScope {
            parallel_id: parallel_id.into(),
            branch_index,
        });
    }

    /// Pop the innermost parallel scope.
    pub fn exit_parallel(&mut self) -> Option<ParallelScope> {
        self.parallel_stack.pop()
    }

    // -----------------------------------------------------------------------
    // Snapshots and final outputs
    // -----------------------------------------------------------------------

    /// A structurally-copied snapshot for handler consumption. O(total
    /// output size); call [`Self::prune_unused_outputs`] between batches to
    /// keep it bounded.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            inputs: self.inputs.clone(),
            node_outputs: self.node_outputs.clone(),
            variables: self.variables.clone(),
            loop_scope: self.loop_stack.last().cloned(),
            parallel_scope: self.parallel_stack.last().cloned(),
        }
    }

    /// Outputs keyed by terminal node id, plus `__variables` when any
    /// variable is set. Ids with no stored output are omitted.
    pub fn final_outputs(&self, terminal_ids: &[String]) -> OutputMap {
        let mut outputs = OutputMap::new();
        for id in terminal_ids {
            if let Some(output) = self.node_outputs.get(id) {
                outputs.insert(id.clone(), Value::Object(output.clone()));
            }
        }
        if !self.variables.is_empty() {
            outputs.insert("__variables".into(), Value::Object(self.variables.clone()));
        }
        outputs
    }
}

/// `{truncated, originalSize, preview}` replacement for oversized outputs.
fn truncation_sentinel(serialized: &str) -> OutputMap {
    let mut end = TRUNCATION_PREVIEW_BYTES.min(serialized.len());
    while !serialized.is_char_boundary(end) {
        end -= 1;
    }

    let mut sentinel = OutputMap::new();
    sentinel.insert("truncated".into(), Value::Bool(true));
    sentinel.insert("originalSize".into(), Value::from(serialized.len()));
    sentinel.insert("preview".into(), Value::String(serialized[..end].to_string()));
    sentinel
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> OutputMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn small_outputs_are_preserved_byte_identical() {
        let mut ctx = ContextManager::new(OutputMap::new());
        let output = map(json!({ "value": 42, "nested": { "ok": true } }));
        ctx.set_node_output("n", output.clone());
        assert_eq!(ctx.get_node_output("n"), Some(&output));
    }

    #[test]
    fn oversized_outputs_become_the_sentinel() {
        let mut ctx = ContextManager::new(OutputMap::new()).with_output_cap(100);
        let big = "x".repeat(500);
        ctx.set_node_output("n", map(json!({ "blob": big })));

        let stored = ctx.get_node_output("n").unwrap();
        assert_eq!(stored["truncated"], true);
        let original_size = stored["originalSize"].as_u64().unwrap() as usize;
        assert!(original_size > 100);
        let preview = stored["preview"].as_str().unwrap();
        assert!(preview.len() <= TRUNCATION_PREVIEW_BYTES);
        assert!(preview.starts_with("{\"blob\""));
    }

    #[test]
    fn variables_are_read_your_writes() {
        let mut ctx = ContextManager::new(OutputMap::new());
        ctx.set_variable("count", json!(3));
        assert_eq!(ctx.get_variable("count"), Some(&json!(3)));

        ctx.set_variable("count", json!(4));
        assert_eq!(ctx.get_variable("count"), Some(&json!(4)));

        ctx.delete_variable("count");
        assert_eq!(ctx.get_variable("count"), None);
    }

    #[test]
    fn snapshots_are_structurally_independent() {
        let mut ctx = ContextManager::new(map(json!({ "in": 1 })));
        ctx.set_node_output("n", map(json!({ "v": 1 })));

        let mut first = ctx.snapshot();
        first
            .node_outputs
            .get_mut("n")
            .unwrap()
            .insert("v".into(), json!(999));
        first.variables.insert("sneaky".into(), json!(true));

        // Mutating the first snapshot affects neither the live context nor
        // any later snapshot.
        let second = ctx.snapshot();
        assert_eq!(second.node_outputs["n"]["v"], 1);
        assert!(second.variables.is_empty());
        assert_eq!(ctx.get_node_output("n").unwrap()["v"], 1);
    }

    #[test]
    fn snapshot_sees_top_of_scope_stacks() {
        let mut ctx = ContextManager::new(OutputMap::new());
        ctx.enter_loop("outer", 0, json!("a"), Some(2));
        ctx.enter_loop("inner", 3, json!("b"), None);
        ctx.enter_parallel("p", 1);

        let snap = ctx.snapshot();
        let loop_scope = snap.loop_scope.unwrap();
        assert_eq!(loop_scope.loop_id, "inner");
        assert_eq!(loop_scope.index, 3);
        assert_eq!(snap.parallel_scope.unwrap().branch_index, 1);

        ctx.exit_loop();
        assert_eq!(ctx.snapshot().loop_scope.unwrap().loop_id, "outer");
        ctx.exit_loop();
        assert!(ctx.snapshot().loop_scope.is_none());
    }

    #[test]
    fn update_loop_iteration_advances_the_innermost_scope() {
        let mut ctx = ContextManager::new(OutputMap::new());
        ctx.enter_loop("l", 0, json!("first"), Some(3));
        ctx.update_loop_iteration(1, json!("second"));

        let scope = ctx.snapshot().loop_scope.unwrap();
        assert_eq!(scope.index, 1);
        assert_eq!(scope.item, json!("second"));
        assert_eq!(scope.total, Some(3));
    }

    #[test]
    fn prune_drops_unreferenced_outputs() {
        let mut ctx = ContextManager::new(OutputMap::new());
        ctx.set_node_output("keep", map(json!({ "v": 1 })));
        ctx.set_node_output("drop", map(json!({ "v": 2 })));

        let needed: HashSet<String> = ["keep".to_string()].into();
        ctx.prune_unused_outputs(&needed);

        assert!(ctx.has_node_output("keep"));
        assert!(!ctx.has_node_output("drop"));
    }

    #[test]
    fn final_outputs_include_variables_when_set() {
        let mut ctx = ContextManager::new(OutputMap::new());
        ctx.set_node_output("out", map(json!({ "result": 6 })));
        ctx.set_node_output("ignored", map(json!({ "x": 1 })));

        let plain = ctx.final_outputs(&["out".to_string()]);
        assert_eq!(plain.len(), 1);
        assert_eq!(plain["out"]["result"], 6);

        ctx.set_variable("mode", json!("live"));
        let with_vars = ctx.final_outputs(&["out".to_string()]);
        assert_eq!(with_vars["__variables"]["mode"], "live");
    }
}
