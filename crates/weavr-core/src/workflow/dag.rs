//! DAG builder, cycle detection, and parallel wave computation.
//!
//! Uses `petgraph` to model step dependencies as a directed graph.
//! Topological sort detects cycles, and depth-based grouping produces
//! parallel execution waves where all steps in a wave can run
//! concurrently.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use weavr_types::workflow::Step;

use super::definition::ParseError;

/// Build an execution plan from workflow steps, grouping them into
/// parallel waves.
///
/// Each wave contains steps that can execute concurrently because all
/// their dependencies are satisfied by prior waves. The algorithm:
///
/// 1. Build a `DiGraph` with step ids as nodes and `depends_on` edges.
/// 2. Run `petgraph::algo::toposort` to verify acyclicity.
/// 3. Compute each node's depth (max dependency depth + 1).
/// 4. Group steps by depth into waves.
///
/// Returns `Vec<Vec<&Step>>` where index 0 is the first wave to execute.
pub fn build_execution_plan(steps: &[Step]) -> Result<Vec<Vec<&Step>>, ParseError> {
    if steps.is_empty() {
        return Ok(vec![]);
    }

    let id_to_step: HashMap<&str, &Step> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let id_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();

    for step in steps {
        let to_idx = id_to_idx[step.id.as_str()];
        for dep in &step.depends_on {
            let from_idx = id_to_idx.get(dep.as_str()).ok_or_else(|| {
                ParseError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                ))
            })?;
            graph.add_edge(node_indices[*from_idx], node_indices[to_idx], ());
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        ParseError::CycleDetected(format!("cycle detected involving step '{}'", node_id))
    })?;

    let mut depths: HashMap<&str, usize> = HashMap::new();
    for &node_idx in &sorted {
        let step_id = graph[node_idx];
        let step = id_to_step[step_id];
        let depth = if step.depends_on.is_empty() {
            0
        } else {
            step.depends_on
                .iter()
                .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0)
        };
        depths.insert(step_id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&Step>> = vec![vec![]; max_depth + 1];
    for step in steps {
        let depth = depths[step.id.as_str()];
        waves[depth].push(step);
    }

    Ok(waves)
}

/// Validate that steps form a valid DAG (no cycles, all references
/// exist), without computing the full wave plan. Used by the parser
/// so invalid workflows are rejected at load time rather than
/// at first execution.
pub fn validate_dag(steps: &[Step]) -> Result<(), ParseError> {
    build_execution_plan(steps).map(|_| ())
}
