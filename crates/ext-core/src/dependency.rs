//! Dependency graph of an install batch and its execution waves.
//!
//! Each wave holds the tasks whose dependencies are not among the tasks
//! still waiting, so a dependency is always installed before the extensions
//! that need it. Every member of a wave leaves the waiting set once the wave
//! runs, whatever its outcome, which makes it possible to plan all waves up
//! front.
//!
//! # Example
//!
//! ```
//! use ext_core::dependency::{DependencyGraph, DependencyNode};
//!
//! let mut graph = DependencyGraph::new();
//! let a = graph.add_node(DependencyNode::new("acme.a").depends_on("acme.b"));
//! let b = graph.add_node(DependencyNode::new("acme.b"));
//!
//! let waves = graph.waves(Some(a), true);
//! assert_eq!(waves[0].members, vec![b]);
//! assert_eq!(waves[1].members, vec![a]);
//! ```

use std::collections::HashSet;

use tracing::{debug, warn};

/// One extension in the batch graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    /// Case-folded `publisher.name` id.
    pub id: String,
    /// Case-folded ids this node depends on.
    pub dependencies: HashSet<String>,
}

impl DependencyNode {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_lowercase(),
            dependencies: HashSet::new(),
        }
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        let id = id.to_lowercase();
        // A self reference can never be satisfied before the node itself.
        if id != self.id {
            self.dependencies.insert(id);
        }
        self
    }
}

/// A set of nodes that run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    /// Indices into the graph, in insertion order.
    pub members: Vec<usize>,
    /// The members form a cycle and were grouped without ordering.
    pub circular: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its index.
    pub fn add_node(&mut self, node: DependencyNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn node(&self, index: usize) -> Option<&DependencyNode> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Plan execution waves.
    ///
    /// `root` is deferred to the last wave unless `root_has_dependents`, so
    /// that everything it brings along is in place first. When no waiting
    /// node is free of waiting dependencies, all of them form one circular
    /// wave.
    pub fn waves(&self, root: Option<usize>, root_has_dependents: bool) -> Vec<Wave> {
        let mut remaining: Vec<usize> = (0..self.nodes.len()).collect();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let waiting: HashSet<&str> = remaining
                .iter()
                .map(|&index| self.nodes[index].id.as_str())
                .collect();

            let mut members: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&index| {
                    self.nodes[index]
                        .dependencies
                        .iter()
                        .all(|dep| !waiting.contains(dep.as_str()))
                })
                .collect();

            if remaining.len() > 1 && !root_has_dependents {
                if let Some(root) = root {
                    members.retain(|&index| index != root);
                }
            }

            let circular = members.is_empty();
            if circular {
                let ids: Vec<&str> = remaining
                    .iter()
                    .map(|&index| self.nodes[index].id.as_str())
                    .collect();
                warn!("Circular dependency among {:?}, installing them together", ids);
                members = remaining.clone();
            }

            debug!(wave = waves.len(), size = members.len(), "Planned install wave");
            remaining.retain(|index| !members.contains(index));
            waves.push(Wave { members, circular });
        }

        waves
    }
}
