//! Topological ordering with Kahn's algorithm.
//!
//! Used for orderings that are not already expressed as a
//! [`DependencyTree`](crate::tree::DependencyTree): bundle-level load order
//! and the global gadget order computed before every pipeline pass.
//!
//! Edges point from predecessor to successor: `add_edge(a, b)` means `a`
//! must come before `b`.
//!
//! Ties are broken by insertion order. Nodes are indexed in the order they
//! are first mentioned (as a node or as either end of an edge), the ready
//! queue is seeded in that order, and nodes that become ready are appended
//! in the order their in-degree reaches zero.
//!
//! ```
//! use modkit_graph::TopologicalSorter;
//!
//! let mut sorter = TopologicalSorter::new();
//! sorter.add_edge("env", "app");
//! sorter.add_edge("lib", "app");
//! sorter.add_edge("env", "lib");
//!
//! assert_eq!(sorter.sort().unwrap(), vec!["env", "lib", "app"]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use crate::error::{Error, Result};

/// Edge set to be ordered.
#[derive(Debug, Clone)]
pub struct TopologicalSorter<N> {
    nodes: Vec<N>,
    index: HashMap<N, usize>,
    /// Successor indices per node, without duplicates.
    edges: Vec<Vec<usize>>,
}

impl<N> Default for TopologicalSorter<N> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
        }
    }
}

impl<N> TopologicalSorter<N>
where
    N: Eq + Hash + Clone + Display,
{
    /// Create an empty sorter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sorter from `(node, successors)` pairs.
    pub fn from_edges<I, S>(graph: I) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        S: IntoIterator<Item = N>,
    {
        let mut sorter = Self::new();
        for (node, successors) in graph {
            sorter.add_node(node.clone());
            for successor in successors {
                sorter.add_edge(node.clone(), successor);
            }
        }
        sorter
    }

    /// Add a node. Adding a known node is a no-op.
    pub fn add_node(&mut self, node: N) -> usize {
        if let Some(&i) = self.index.get(&node) {
            return i;
        }
        let i = self.nodes.len();
        self.index.insert(node.clone(), i);
        self.nodes.push(node);
        self.edges.push(Vec::new());
        i
    }

    /// Declare that `from` must be ordered before `to`.
    pub fn add_edge(&mut self, from: N, to: N) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct successors of `node`.
    pub fn successors_of(&self, node: &N) -> Vec<&N> {
        self.index
            .get(node)
            .map(|&i| self.edges[i].iter().map(|&s| &self.nodes[s]).collect())
            .unwrap_or_default()
    }

    /// Order every node so that each edge's source precedes its target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cycle`] listing the nodes still holding incoming
    /// edges when no further node can be released. No partial order is
    /// returned.
    pub fn sort(&self) -> Result<Vec<N>> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for successors in &self.edges {
            for &s in successors {
                in_degree[s] += 1;
            }
        }

        let mut ready: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = ready.pop_front() {
            order.push(self.nodes[current].clone());
            for &successor in &self.edges[current] {
                in_degree[successor] -= 1;
                if in_degree[successor] == 0 {
                    ready.push_back(successor);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let participants = (0..self.nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.nodes[i].to_string())
                .collect();
            return Err(Error::Cycle { participants });
        }

        Ok(order)
    }
}
