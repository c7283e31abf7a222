//! Workflow builder — compiles a user definition into an execution plan.
//!
//! Single pass pipeline, run before anything is executed:
//! 1. Normalization: unique node IDs, edge IDs assigned, dangling edges
//!    dropped (warning), exactly one entry point resolved.
//! 2. Edge classification: `error` / `control` / `data`, with `loop-back`
//!    finalized once boundaries are known.
//! 3. Boundary detection: loop-start/loop-end and parallel-start/parallel-end
//!    regions, innermost tag wins; mismatched pairs fail the build.
//! 4. Topological layering: Kahn-style BFS levels over the non-loop-back
//!    graph, deterministic tie-break by node id.
//!
//! The same input always yields structurally identical output, warnings
//! included. All failures surface as [`BuildError`]; no partial plan is
//! returned.

use std::collections::{HashMap, HashSet, VecDeque};

use nodes::{node_types, ports};
use serde_json::Value;

use crate::models::{NodeDescriptor, WorkflowDefinition};
use crate::plan::{EdgeKind, ExecutableNode, ExecutionPlan, PlanEdge};
use crate::BuildError;

/// Compile `definition` into an immutable [`ExecutionPlan`].
///
/// # Errors
/// - [`BuildError::DuplicateNodeId`] if two nodes share an ID.
/// - [`BuildError::NoEntryPoint`] / [`BuildError::MultipleEntryPoints`] if
///   the entry node cannot be resolved uniquely.
/// - [`BuildError::UnbalancedBoundary`] for unmatched loop/parallel pairs.
/// - [`BuildError::CycleDetected`] if the non-loop-back graph is cyclic.
pub fn build(definition: &WorkflowDefinition) -> Result<ExecutionPlan, BuildError> {
    let mut warnings: Vec<String> = Vec::new();

    // ------------------------------------------------------------------
    // 1. Normalization
    // ------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &definition.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(BuildError::DuplicateNodeId(node.id.clone()));
        }
    }

    let node_map: HashMap<&str, &NodeDescriptor> = definition
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n))
        .collect();

    let mut edges: Vec<PlanEdge> = Vec::with_capacity(definition.edges.len());
    for (index, edge) in definition.edges.iter().enumerate() {
        let id = edge
            .id
            .clone()
            .unwrap_or_else(|| format!("edge-{index}"));

        if !node_map.contains_key(edge.source.as_str()) {
            warnings.push(format!(
                "edge '{id}' references unknown source node '{}'; dropped",
                edge.source
            ));
            continue;
        }
        if !node_map.contains_key(edge.target.as_str()) {
            warnings.push(format!(
                "edge '{id}' references unknown target node '{}'; dropped",
                edge.target
            ));
            continue;
        }
        if edge.source == edge.target
            && node_map[edge.source.as_str()].node_type != node_types::LOOP_START
        {
            // A self-loop anywhere else can never be scheduled.
            return Err(BuildError::CycleDetected(vec![edge.source.clone()]));
        }

        edges.push(PlanEdge {
            id,
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_port: edge.source_port.clone(),
            target_port: edge.target_port.clone(),
            kind: EdgeKind::Data, // refined below
        });
    }

    let entry_node_id = resolve_entry(definition, &node_map)?;

    let mut additional_entries: Vec<String> = Vec::new();
    for id in &definition.additional_entry_ids {
        if node_map.contains_key(id.as_str()) {
            additional_entries.push(id.clone());
        } else {
            warnings.push(format!("additional entry '{id}' does not exist; ignored"));
        }
    }

    // ------------------------------------------------------------------
    // 2. Edge classification (error / control / data)
    // ------------------------------------------------------------------
    let error_ports: HashSet<&str> = node_map
        .values()
        .filter(|n| has_error_port(n, &edges))
        .map(|n| n.id.as_str())
        .collect();

    for edge in &mut edges {
        let source = node_map[edge.source.as_str()];
        if edge.source_port.as_deref() == Some(ports::ERROR)
            && error_ports.contains(edge.source.as_str())
        {
            edge.kind = EdgeKind::Error;
        } else if edge.source_port.is_some()
            && node_types::ROUTING_TYPES.contains(&source.node_type.as_str())
        {
            edge.kind = EdgeKind::Control;
        }
    }

    // Terminal nodes end their branch: outgoing data edges are dead weight.
    edges.retain(|edge| {
        let source = node_map[edge.source.as_str()];
        let dead = is_terminal(source) && edge.kind == EdgeKind::Data;
        if dead {
            warnings.push(format!(
                "terminal node '{}' has outgoing data edge '{}'; dropped",
                edge.source, edge.id
            ));
        }
        !dead
    });

    // ------------------------------------------------------------------
    // 3. Boundary detection
    // ------------------------------------------------------------------
    let loop_regions = detect_regions(
        "loop",
        node_types::LOOP_START,
        node_types::LOOP_END,
        &node_map,
        &edges,
    )?;
    let parallel_regions = detect_regions(
        "parallel",
        node_types::PARALLEL_START,
        node_types::PARALLEL_END,
        &node_map,
        &edges,
    )?;

    // An edge into a loop-start from inside its own region closes the loop.
    for edge in &mut edges {
        if let Some((_, members)) = loop_regions
            .iter()
            .find(|(start, _)| *start == edge.target)
        {
            if members.contains(&edge.source) && edge.kind != EdgeKind::Error {
                edge.kind = EdgeKind::LoopBack;
            }
        }
    }

    // ------------------------------------------------------------------
    // 4. Topological layering (non-loop-back edges only)
    // ------------------------------------------------------------------
    let forward: Vec<&PlanEdge> = edges.iter().filter(|e| e.kind != EdgeKind::LoopBack).collect();

    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &forward {
        successors
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut reachable: HashSet<&str> = HashSet::new();
    let mut frontier: VecDeque<&str> = VecDeque::new();
    frontier.push_back(entry_node_id.as_str());
    for id in &additional_entries {
        frontier.push_back(id.as_str());
    }
    while let Some(id) = frontier.pop_front() {
        if !reachable.insert(id) {
            continue;
        }
        if let Some(next) = successors.get(id) {
            frontier.extend(next.iter().copied());
        }
    }

    let mut in_degree: HashMap<&str, usize> = reachable.iter().map(|&id| (id, 0)).collect();
    for edge in &forward {
        if reachable.contains(edge.source.as_str()) && reachable.contains(edge.target.as_str()) {
            *in_degree.get_mut(edge.target.as_str()).expect("target is reachable") += 1;
        }
    }

    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    current.sort_unstable();

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut level_of: HashMap<String, usize> = HashMap::new();
    while !current.is_empty() {
        let mut next: Vec<&str> = Vec::new();
        for &id in &current {
            level_of.insert(id.to_string(), levels.len());
            if let Some(targets) = successors.get(id) {
                for &target in targets {
                    if !reachable.contains(target) {
                        continue;
                    }
                    let degree = in_degree.get_mut(target).expect("target is reachable");
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(target);
                    }
                }
            }
        }
        levels.push(current.iter().map(|s| s.to_string()).collect());
        next.sort_unstable();
        next.dedup();
        current = next;
    }

    if level_of.len() != reachable.len() {
        let mut cyclic: Vec<String> = reachable
            .iter()
            .filter(|&&id| !level_of.contains_key(id))
            .map(|&id| id.to_string())
            .collect();
        cyclic.sort();
        return Err(BuildError::CycleDetected(cyclic));
    }

    // ------------------------------------------------------------------
    // Assemble executable nodes
    // ------------------------------------------------------------------
    let mut dependencies: HashMap<&str, Vec<String>> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<String>> = HashMap::new();
    for edge in &forward {
        let (source, target) = (edge.source.as_str(), edge.target.as_str());
        // Only scheduled endpoints gate execution; retained-but-unscheduled
        // nodes never resolve and would wedge the queue.
        if level_of.contains_key(source) && level_of.contains_key(target) {
            dependencies.entry(target).or_default().push(source.to_string());
            dependents.entry(source).or_default().push(target.to_string());
        }
    }

    let mut nodes: HashMap<String, ExecutableNode> = HashMap::with_capacity(definition.nodes.len());
    for descriptor in &definition.nodes {
        let id = descriptor.id.as_str();
        let mut deps = dependencies.remove(id).unwrap_or_default();
        deps.sort();
        deps.dedup();
        let mut deps_on = dependents.remove(id).unwrap_or_default();
        deps_on.sort();
        deps_on.dedup();

        nodes.insert(
            descriptor.id.clone(),
            ExecutableNode {
                id: descriptor.id.clone(),
                node_type: descriptor.node_type.clone(),
                name: descriptor.name.clone(),
                config: descriptor.config.clone(),
                dependencies: deps,
                dependents: deps_on,
                has_error_port: error_ports.contains(id),
                is_terminal: is_terminal(descriptor),
                loop_boundary: innermost_tag(id, &loop_regions),
                parallel_boundary: innermost_tag(id, &parallel_regions),
            },
        );
    }

    Ok(ExecutionPlan {
        workflow_id: definition.id,
        entry_node_id,
        nodes,
        levels,
        level_of,
        edges,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_entry(
    definition: &WorkflowDefinition,
    node_map: &HashMap<&str, &NodeDescriptor>,
) -> Result<String, BuildError> {
    if let Some(id) = &definition.entry_node_id {
        return if node_map.contains_key(id.as_str()) {
            Ok(id.clone())
        } else {
            Err(BuildError::NoEntryPoint)
        };
    }

    let candidates: Vec<&str> = definition
        .nodes
        .iter()
        .filter(|n| node_types::ENTRY_TYPES.contains(&n.node_type.as_str()))
        .map(|n| n.id.as_str())
        .collect();

    match candidates.as_slice() {
        [] => Err(BuildError::NoEntryPoint),
        [only] => Ok(only.to_string()),
        many => {
            let mut ids: Vec<String> = many.iter().map(|s| s.to_string()).collect();
            ids.sort();
            Err(BuildError::MultipleEntryPoints(ids))
        }
    }
}

fn has_error_port(node: &NodeDescriptor, edges: &[PlanEdge]) -> bool {
    let flagged = node
        .config
        .get("errorPort")
        .map(truthy_config)
        .unwrap_or(false);
    flagged
        || edges
            .iter()
            .any(|e| e.source == node.id && e.source_port.as_deref() == Some(ports::ERROR))
}

fn truthy_config(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

fn is_terminal(node: &NodeDescriptor) -> bool {
    node_types::TERMINAL_TYPES.contains(&node.node_type.as_str())
}

/// The innermost (smallest) region containing `id`, if any.
fn innermost_tag(id: &str, regions: &[(String, HashSet<String>)]) -> Option<String> {
    regions
        .iter()
        .filter(|(_, members)| members.contains(id))
        .min_by_key(|(_, members)| members.len())
        .map(|(start, _)| start.clone())
}

/// Discover every `start_type` region: the sub-graph from each start node up
/// to its matching `end_type` node, with nested regions skipped over.
///
/// Returns `(start_id, members)` pairs (members include both boundary
/// nodes), sorted by start id.
fn detect_regions(
    kind: &'static str,
    start_type: &str,
    end_type: &str,
    node_map: &HashMap<&str, &NodeDescriptor>,
    edges: &[PlanEdge],
) -> Result<Vec<(String, HashSet<String>)>, BuildError> {
    let mut starts: Vec<&str> = node_map
        .values()
        .filter(|n| n.node_type == start_type)
        .map(|n| n.id.as_str())
        .collect();
    starts.sort_unstable();

    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        successors
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut regions: Vec<(String, HashSet<String>)> = Vec::new();
    let mut claimed_ends: HashSet<String> = HashSet::new();
    for start in &starts {
        let (members, end) =
            trace_region(kind, start, start_type, end_type, node_map, &successors)?;
        // Two starts converging on one end cannot both be balanced.
        if !claimed_ends.insert(end) {
            return Err(BuildError::UnbalancedBoundary {
                kind,
                node_id: start.to_string(),
            });
        }
        regions.push((start.to_string(), members));
    }

    for node in node_map.values() {
        if node.node_type == end_type && !claimed_ends.contains(node.id.as_str()) {
            return Err(BuildError::UnbalancedBoundary {
                kind,
                node_id: node.id.clone(),
            });
        }
    }

    Ok(regions)
}

/// Walk forward from `start` collecting the region it opens, skipping over
/// nested regions of the same kind, until the matching end node.
fn trace_region(
    kind: &'static str,
    start: &str,
    start_type: &str,
    end_type: &str,
    node_map: &HashMap<&str, &NodeDescriptor>,
    successors: &HashMap<&str, Vec<&str>>,
) -> Result<(HashSet<String>, String), BuildError> {
    let mut members: HashSet<String> = HashSet::from([start.to_string()]);
    let mut visited: HashSet<String> = HashSet::new();
    let mut end_id: Option<String> = None;

    let mut frontier: VecDeque<&str> = successors
        .get(start)
        .map(|next| next.iter().copied().collect())
        .unwrap_or_default();

    while let Some(id) = frontier.pop_front() {
        if id == start || !visited.insert(id.to_string()) {
            continue;
        }
        let node = node_map[id];

        if node.node_type == end_type {
            members.insert(id.to_string());
            match &end_id {
                Some(existing) if existing != id => {
                    return Err(BuildError::UnbalancedBoundary {
                        kind,
                        node_id: start.to_string(),
                    });
                }
                _ => end_id = Some(id.to_string()),
            }
            continue; // do not expand past our end
        }

        if node.node_type == start_type {
            // Nested region: absorb it whole and resume after its end.
            let (inner_members, inner_end) =
                trace_region(kind, id, start_type, end_type, node_map, successors)?;
            for member in &inner_members {
                visited.insert(member.clone());
            }
            members.extend(inner_members);
            if let Some(next) = successors.get(inner_end.as_str()) {
                frontier.extend(next.iter().copied());
            }
            continue;
        }

        members.insert(id.to_string());
        if let Some(next) = successors.get(id) {
            frontier.extend(next.iter().copied());
        }
    }

    match end_id {
        Some(end) => Ok((members, end)),
        None => Err(BuildError::UnbalancedBoundary {
            kind,
            node_id: start.to_string(),
        }),
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EdgeDescriptor;
    use serde_json::json;

    fn node(id: &str, node_type: &str) -> NodeDescriptor {
        NodeDescriptor::new(id, node_type)
    }

    fn edge(source: &str, target: &str) -> EdgeDescriptor {
        EdgeDescriptor::new(source, target)
    }

    fn definition(nodes: Vec<NodeDescriptor>, edges: Vec<EdgeDescriptor>) -> WorkflowDefinition {
        WorkflowDefinition::new("test", nodes, edges)
    }

    #[test]
    fn linear_chain_builds_three_levels() {
        let plan = build(&definition(
            vec![node("a", "input"), node("b", "transform"), node("c", "output")],
            vec![edge("a", "b"), edge("b", "c")],
        ))
        .expect("valid definition");

        assert_eq!(plan.levels, vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(plan.node("b").unwrap().dependencies, vec!["a"]);
        assert_eq!(plan.node("b").unwrap().dependents, vec!["c"]);
        assert!(plan.node("c").unwrap().is_terminal);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn diamond_shares_a_level() {
        let plan = build(&definition(
            vec![
                node("a", "input"),
                node("b", "mock"),
                node("c", "mock"),
                node("d", "mock"),
            ],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        ))
        .expect("valid definition");

        assert_eq!(plan.levels, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        assert_eq!(plan.node("d").unwrap().dependencies, vec!["b", "c"]);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let err = build(&definition(
            vec![node("a", "input"), node("a", "mock")],
            vec![],
        ))
        .unwrap_err();
        assert_eq!(err, BuildError::DuplicateNodeId("a".into()));
    }

    #[test]
    fn entry_resolution_requires_exactly_one_candidate() {
        let err = build(&definition(vec![node("a", "mock")], vec![])).unwrap_err();
        assert_eq!(err, BuildError::NoEntryPoint);

        let err = build(&definition(
            vec![node("a", "input"), node("b", "trigger")],
            vec![],
        ))
        .unwrap_err();
        assert_eq!(err, BuildError::MultipleEntryPoints(vec!["a".into(), "b".into()]));

        // An explicit entry overrides type-based derivation.
        let plan = build(
            &definition(vec![node("a", "mock"), node("b", "mock")], vec![edge("a", "b")])
                .with_entry("a"),
        )
        .expect("explicit entry");
        assert_eq!(plan.entry_node_id, "a");
    }

    #[test]
    fn missing_explicit_entry_fails() {
        let err = build(&definition(vec![node("a", "mock")], vec![]).with_entry("ghost"))
            .unwrap_err();
        assert_eq!(err, BuildError::NoEntryPoint);
    }

    #[test]
    fn dangling_edges_are_dropped_with_warning() {
        let plan = build(&definition(
            vec![node("a", "input"), node("b", "mock")],
            vec![edge("a", "b"), edge("a", "ghost"), edge("ghost", "b")],
        ))
        .expect("dangling edges are non-fatal");

        assert_eq!(plan.edges.len(), 1);
        assert_eq!(plan.warnings.len(), 2);
        assert!(plan.warnings[0].contains("unknown target node 'ghost'"));
        assert!(plan.warnings[1].contains("unknown source node 'ghost'"));
    }

    #[test]
    fn cycle_is_detected_and_named() {
        let err = build(&definition(
            vec![node("a", "input"), node("b", "mock"), node("c", "mock")],
            vec![edge("a", "b"), edge("b", "c"), edge("c", "b")],
        ))
        .unwrap_err();
        assert_eq!(err, BuildError::CycleDetected(vec!["b".into(), "c".into()]));
    }

    #[test]
    fn self_loop_on_plain_node_is_rejected() {
        let err = build(&definition(
            vec![node("a", "input"), node("b", "mock")],
            vec![edge("a", "b"), edge("b", "b")],
        ))
        .unwrap_err();
        assert_eq!(err, BuildError::CycleDetected(vec!["b".into()]));
    }

    #[test]
    fn error_port_edges_are_classified() {
        let plan = build(&definition(
            vec![node("a", "input"), node("b", "mock"), node("ok", "mock"), node("err", "mock")],
            vec![
                edge("a", "b"),
                edge("b", "ok"),
                edge("b", "err").from_port("error"),
            ],
        ))
        .expect("valid definition");

        assert!(plan.node("b").unwrap().has_error_port);
        let error_edge = plan.edges_between("b", "err").next().unwrap();
        assert_eq!(error_edge.kind, EdgeKind::Error);
        let data_edge = plan.edges_between("b", "ok").next().unwrap();
        assert_eq!(data_edge.kind, EdgeKind::Data);
    }

    #[test]
    fn error_port_config_flag_is_honored() {
        let plan = build(&definition(
            vec![
                node("a", "input"),
                node("b", "mock").with_config(json!({ "errorPort": true })),
            ],
            vec![edge("a", "b")],
        ))
        .expect("valid definition");
        assert!(plan.node("b").unwrap().has_error_port);
    }

    #[test]
    fn route_ports_on_conditionals_are_control_edges() {
        let plan = build(&definition(
            vec![
                node("a", "input"),
                node("cond", "conditional"),
                node("t", "mock"),
                node("f", "mock"),
            ],
            vec![
                edge("a", "cond"),
                edge("cond", "t").from_port("true"),
                edge("cond", "f").from_port("false"),
            ],
        ))
        .expect("valid definition");

        assert_eq!(plan.edges_between("cond", "t").next().unwrap().kind, EdgeKind::Control);
        assert_eq!(plan.edges_between("cond", "f").next().unwrap().kind, EdgeKind::Control);
    }

    #[test]
    fn loop_region_is_tagged_and_back_edge_classified() {
        let plan = build(&definition(
            vec![
                node("a", "input"),
                node("ls", "loop-start"),
                node("body", "mock"),
                node("le", "loop-end"),
                node("after", "mock"),
            ],
            vec![
                edge("a", "ls"),
                edge("ls", "body"),
                edge("body", "le"),
                edge("le", "ls"), // back to the start
                edge("le", "after"),
            ],
        ))
        .expect("valid definition");

        for id in ["ls", "body", "le"] {
            assert_eq!(plan.node(id).unwrap().loop_boundary.as_deref(), Some("ls"), "{id}");
        }
        assert_eq!(plan.node("after").unwrap().loop_boundary, None);
        assert_eq!(plan.node("a").unwrap().loop_boundary, None);

        let back = plan.edges_between("le", "ls").next().unwrap();
        assert_eq!(back.kind, EdgeKind::LoopBack);

        // The back edge is excluded from the dependency graph.
        assert_eq!(plan.node("ls").unwrap().dependencies, vec!["a"]);
        assert_eq!(plan.levels.len(), 5);
    }

    #[test]
    fn nested_loops_take_the_innermost_tag() {
        let plan = build(&definition(
            vec![
                node("a", "input"),
                node("outer", "loop-start"),
                node("inner", "loop-start"),
                node("deep", "mock"),
                node("inner_end", "loop-end"),
                node("outer_end", "loop-end"),
            ],
            vec![
                edge("a", "outer"),
                edge("outer", "inner"),
                edge("inner", "deep"),
                edge("deep", "inner_end"),
                edge("inner_end", "outer_end"),
            ],
        ))
        .expect("valid definition");

        assert_eq!(plan.node("deep").unwrap().loop_boundary.as_deref(), Some("inner"));
        assert_eq!(plan.node("inner").unwrap().loop_boundary.as_deref(), Some("inner"));
        assert_eq!(plan.node("outer_end").unwrap().loop_boundary.as_deref(), Some("outer"));
    }

    #[test]
    fn unmatched_loop_start_fails() {
        let err = build(&definition(
            vec![node("a", "input"), node("ls", "loop-start"), node("body", "mock")],
            vec![edge("a", "ls"), edge("ls", "body")],
        ))
        .unwrap_err();
        assert_eq!(
            err,
            BuildError::UnbalancedBoundary { kind: "loop", node_id: "ls".into() }
        );
    }

    #[test]
    fn unmatched_loop_end_fails() {
        let err = build(&definition(
            vec![node("a", "input"), node("le", "loop-end")],
            vec![edge("a", "le")],
        ))
        .unwrap_err();
        assert_eq!(
            err,
            BuildError::UnbalancedBoundary { kind: "loop", node_id: "le".into() }
        );
    }

    #[test]
    fn parallel_region_is_tagged() {
        let plan = build(&definition(
            vec![
                node("a", "input"),
                node("ps", "parallel-start"),
                node("b1", "mock"),
                node("b2", "mock"),
                node("pe", "parallel-end"),
            ],
            vec![
                edge("a", "ps"),
                edge("ps", "b1"),
                edge("ps", "b2"),
                edge("b1", "pe"),
                edge("b2", "pe"),
            ],
        ))
        .expect("valid definition");

        for id in ["ps", "b1", "b2", "pe"] {
            assert_eq!(
                plan.node(id).unwrap().parallel_boundary.as_deref(),
                Some("ps"),
                "{id}"
            );
        }
    }

    #[test]
    fn terminal_outgoing_data_edges_are_dropped() {
        let plan = build(&definition(
            vec![node("a", "input"), node("out", "output"), node("b", "mock")],
            vec![edge("a", "out"), edge("out", "b")],
        ))
        .expect("valid definition");

        assert!(plan.edges_between("out", "b").next().is_none());
        assert!(plan
            .warnings
            .iter()
            .any(|w| w.contains("terminal node 'out'")));
        // 'b' is now unreachable but retained.
        assert!(plan.node("b").is_some());
        assert!(!plan.is_scheduled("b"));
    }

    #[test]
    fn unreachable_nodes_are_retained_but_unscheduled() {
        let plan = build(&definition(
            vec![
                node("a", "input"),
                node("b", "mock"),
                node("island", "mock"),
                node("downstream", "mock"),
            ],
            vec![edge("a", "b"), edge("island", "downstream")],
        ))
        .expect("valid definition");

        assert_eq!(plan.unscheduled_ids(), vec!["downstream", "island"]);
        assert_eq!(plan.levels, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn marked_detached_roots_are_scheduled_at_level_zero() {
        let mut def = definition(
            vec![node("a", "input"), node("side", "mock"), node("side2", "mock")],
            vec![edge("side", "side2")],
        );
        def.additional_entry_ids = vec!["side".into()];

        let plan = build(&def).expect("valid definition");
        assert_eq!(plan.levels[0], vec!["a", "side"]);
        assert!(plan.is_scheduled("side2"));
    }

    #[test]
    fn identical_definitions_build_identical_plans() {
        let def = definition(
            vec![
                node("a", "input"),
                node("m", "mock"),
                node("n", "mock"),
                node("z", "output"),
            ],
            vec![
                edge("a", "m"),
                edge("a", "n"),
                edge("m", "z"),
                edge("n", "z"),
                edge("a", "ghost"),
            ],
        );

        let one = build(&def).expect("valid");
        let two = build(&def).expect("valid");
        assert_eq!(one.levels, two.levels);
        assert_eq!(one.warnings, two.warnings);
        assert_eq!(
            serde_json::to_value(&one.nodes).unwrap(),
            serde_json::to_value(&two.nodes).unwrap()
        );
    }
}
