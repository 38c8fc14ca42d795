// src/graph/validate.rs

//! Structural validation of a built task graph.

use std::collections::BTreeMap;
use std::path::PathBuf;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{Result, StarbashError};

use super::task::Task;

/// Validate the graph: acyclic, every non-produced input exists on disk,
/// deterministic topological order is computable.
pub fn validate(tasks: &BTreeMap<String, Task>, target: &str) -> Result<()> {
    // Edge direction: producer -> consumer.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in tasks.keys() {
        graph.add_node(name.as_str());
    }
    for (name, task) in tasks {
        for dep in &task.deps {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        return Err(StarbashError::GraphCycle(cycle.node_id().to_string()));
    }

    let produced: std::collections::BTreeSet<&PathBuf> =
        tasks.values().flat_map(|t| t.outputs.iter()).collect();
    let mut missing = Vec::new();
    for task in tasks.values() {
        for input in task.input_paths() {
            if !produced.contains(input) && !input.exists() {
                missing.push(input.display().to_string());
            }
        }
    }
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(StarbashError::MissingInputs {
            target: target.to_string(),
            inputs: missing,
        });
    }

    Ok(())
}
