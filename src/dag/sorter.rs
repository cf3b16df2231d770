// src/dag/sorter.rs

//! Deterministic topological ordering of steps.
//!
//! Kahn's algorithm over the dependency graph. Among the steps whose
//! dependencies are all done, the one with the lowest `(priority, name)` runs
//! next, where a missing priority sorts after every explicit one. The name
//! tie-break keeps the order identical across runs.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::dag::{DependencyGraph, Scheduled};
use crate::errors::{ConvoyError, Result};

/// Ordering key for ready steps: prioritized first, then priority, then name.
type ReadyKey<'a> = (bool, u32, &'a str);

fn ready_key<T: Scheduled>(node: &T) -> ReadyKey<'_> {
    match node.priority() {
        Some(p) => (false, p, node.name()),
        None => (true, u32::MAX, node.name()),
    }
}

/// Order `nodes` so that every step comes after all of its dependencies.
///
/// Fails with [`ConvoyError::MissingDependency`] when a dependency is not
/// part of `nodes`, and with [`ConvoyError::CircularDependency`] when the
/// dependencies form a cycle. No partial order is returned in either case.
pub fn sort<T: Scheduled>(nodes: &[T]) -> Result<Vec<&T>> {
    sort_with_satisfied(nodes, &HashSet::new())
}

/// Like [`sort`], but dependencies named in `satisfied` are considered met
/// even though they are not part of `nodes`.
pub fn sort_with_satisfied<'a, T: Scheduled>(
    nodes: &'a [T],
    satisfied: &HashSet<String>,
) -> Result<Vec<&'a T>> {
    let graph = DependencyGraph::build(nodes, satisfied)?;
    let by_name: HashMap<&str, &'a T> = nodes.iter().map(|n| (n.name(), n)).collect();
    let mut in_degree = graph.in_degrees();

    let mut ready: BTreeSet<ReadyKey<'a>> = nodes
        .iter()
        .filter(|n| in_degree.get(n.name()).copied().unwrap_or(0) == 0)
        .map(|n| ready_key(n))
        .collect();

    let mut ordered: Vec<&'a T> = Vec::with_capacity(nodes.len());

    while let Some((_, _, name)) = ready.pop_first() {
        let node = by_name[name];
        ordered.push(node);

        for dependent in graph.dependents_of(name) {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(ready_key(by_name[dependent]));
                }
            }
        }
    }

    if ordered.len() < nodes.len() {
        let mut unresolved: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        unresolved.sort();
        return Err(ConvoyError::CircularDependency(unresolved));
    }

    debug!(
        order = ?ordered.iter().map(|n| n.name()).collect::<Vec<_>>(),
        "computed step execution order"
    );

    Ok(ordered)
}
