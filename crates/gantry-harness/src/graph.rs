//! Service dependency graph using `petgraph`.
//!
//! Builds a directed acyclic graph from `depends_on` declarations and
//! resolves the startup order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use std::collections::HashMap;

use gantry_common::error::{GantryError, Result};
use petgraph::Direction;
use petgraph::graph::NodeIndex;

use crate::service::{ServiceSpec, check_services};

/// A dependency graph of services.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: petgraph::Graph<String, ()>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service node. Declaration order is the tie-break for
    /// services that become startable at the same time.
    pub fn add_service(&mut self, name: impl Into<String>) -> NodeIndex {
        self.graph.add_node(name.into())
    }

    /// Adds a dependency edge: `dependent` depends on `dependency`.
    ///
    /// The graph edge points from `dependency` to `dependent` so that
    /// dependencies sort first.
    pub fn add_dependency(&mut self, dependent: NodeIndex, dependency: NodeIndex) {
        let _ = self.graph.add_edge(dependency, dependent, ());
    }

    /// Returns the startup order: every service after all of its
    /// dependencies, and otherwise in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains a cycle.
    pub fn resolve_order(&self) -> Result<Vec<String>> {
        if let Err(cycle) = petgraph::algo::toposort(&self.graph, None) {
            let name = self
                .graph
                .node_weight(cycle.node_id())
                .cloned()
                .unwrap_or_default();
            return Err(GantryError::Config {
                message: format!("cyclic dependency detected involving service \"{name}\""),
            });
        }

        let mut pending: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .count()
            })
            .collect();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|n| pending[n.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.graph[node].clone());
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                pending[next.index()] -= 1;
                if pending[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        Ok(order)
    }
}

/// Orders services so that each starts after everything it depends on.
///
/// # Errors
///
/// Returns a configuration error for duplicate names, unknown
/// dependencies, or cycles.
pub fn startup_order(services: &[ServiceSpec]) -> Result<Vec<&ServiceSpec>> {
    check_services(services)?;

    let mut graph = DependencyGraph::new();
    let nodes: HashMap<&str, NodeIndex> = services
        .iter()
        .map(|s| (s.name(), graph.add_service(s.name())))
        .collect();
    for service in services {
        for dep in service.dependencies() {
            if let (Some(&dependent), Some(&dependency)) =
                (nodes.get(service.name()), nodes.get(dep.as_str()))
            {
                graph.add_dependency(dependent, dependency);
            }
        }
    }

    let by_name: HashMap<&str, &ServiceSpec> = services.iter().map(|s| (s.name(), s)).collect();
    Ok(graph
        .resolve_order()?
        .iter()
        .filter_map(|name| by_name.get(name.as_str()).copied())
        .collect())
}
