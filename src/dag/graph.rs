// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::Scheduled;
use crate::errors::{ConvoyError, Result};

/// Dependency graph keyed by step name.
///
/// Edge direction is dependency -> dependent: for a step `B` declaring a
/// dependency on `A`, the graph holds the edge `A -> B`.
#[derive(Debug, Clone)]
pub struct DependencyGraph<'a> {
    graph: DiGraphMap<&'a str, ()>,
    names: HashSet<&'a str>,
}

impl<'a> DependencyGraph<'a> {
    /// Build a graph from `nodes`.
    ///
    /// Fails on duplicate names and on dependencies that are neither part of
    /// `nodes` nor listed in `satisfied`. Dependencies in `satisfied` are
    /// treated as already met and produce no edge.
    pub fn build<T: Scheduled>(nodes: &'a [T], satisfied: &HashSet<String>) -> Result<Self> {
        let mut graph: DiGraphMap<&'a str, ()> = DiGraphMap::new();
        let mut names: HashSet<&'a str> = HashSet::new();

        for node in nodes {
            if !names.insert(node.name()) {
                return Err(ConvoyError::ConfigError(format!(
                    "step name '{}' is declared more than once",
                    node.name()
                )));
            }
            graph.add_node(node.name());
        }

        for node in nodes {
            for dep in node.dependencies() {
                if satisfied.contains(dep) {
                    debug!(step = %node.name(), dependency = %dep, "dependency treated as satisfied");
                    continue;
                }
                if !names.contains(dep.as_str()) {
                    return Err(ConvoyError::MissingDependency {
                        step: node.name().to_string(),
                        dependency: dep.clone(),
                    });
                }
                graph.add_edge(dep.as_str(), node.name(), ());
            }
        }

        Ok(Self { graph, names })
    }

    /// All step names, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.graph.nodes()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Direct dependencies of `name` that are part of this graph.
    pub fn dependencies_of(&self, name: &str) -> Vec<&'a str> {
        match self.names.get(name) {
            Some(key) => self.graph.neighbors_directed(*key, Direction::Incoming).collect(),
            None => Vec::new(),
        }
    }

    /// Direct dependents of `name` (steps that list it as a dependency).
    pub fn dependents_of(&self, name: &str) -> Vec<&'a str> {
        match self.names.get(name) {
            Some(key) => self.graph.neighbors_directed(*key, Direction::Outgoing).collect(),
            None => Vec::new(),
        }
    }

    /// Number of unmet dependencies per step.
    pub fn in_degrees(&self) -> HashMap<&'a str, usize> {
        self.graph
            .nodes()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect()
    }
}
