//! Multi-parent dependency tree.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Every node keeps
//! an ordered list of children and a derived list of parents; the two are
//! always kept mutually consistent by the private `link` and `unlink`
//! helpers, the only code paths that touch either list.
//!
//! Parent edges are lookups only. A node stays alive until it is removed
//! with [`DependencyTree::remove_from_tree`], regardless of how many parents
//! point at it.
//!
//! Edges point from dependency to dependent: a node is the child of every
//! node it depends on, so breadth-first flattening yields a valid
//! activation order.
//!
//! ```
//! use modkit_graph::tree::DependencyTree;
//!
//! let mut tree = DependencyTree::new();
//! let core = tree.insert("core");
//! let ui = tree.insert("ui");
//! let theme = tree.insert("theme");
//! tree.add_child(core, ui).unwrap();
//! tree.add_child(core, theme).unwrap();
//! tree.add_child(ui, theme).unwrap();
//!
//! let order = tree.flatten_breadth_first(core, false).unwrap();
//! assert_eq!(tree.values(&order), vec![&"core", &"ui", &"theme"]);
//! ```

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::error::{Error, Result};

/// Handle to a node in a [`DependencyTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Node<T> {
    value: T,
    children: Vec<NodeId>,
    parents: Vec<NodeId>,
    read_only: bool,
}

/// Arena-backed multi-parent DAG.
#[derive(Debug, Clone)]
pub struct DependencyTree<T> {
    nodes: Vec<Option<Node<T>>>,
    live: usize,
}

impl<T> Default for DependencyTree<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            live: 0,
        }
    }
}

impl<T> DependencyTree<T> {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detached node holding `value`.
    pub fn insert(&mut self, value: T) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            value,
            children: Vec::new(),
            parents: Vec::new(),
            read_only: false,
        }));
        self.live += 1;
        id
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Whether `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(Option::is_some)
    }

    pub fn value(&self, id: NodeId) -> Option<&T> {
        self.node(id).ok().map(|n| &n.value)
    }

    /// Replace the value held by a node.
    pub fn set_value(&mut self, id: NodeId, value: T) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.read_only {
            return Err(Error::ReadOnly(id));
        }
        node.value = value;
        Ok(())
    }

    /// Map node handles to their values, skipping dead handles.
    pub fn values(&self, ids: &[NodeId]) -> Vec<&T> {
        ids.iter().filter_map(|&id| self.value(id)).collect()
    }

    /// Direct children in insertion (or sorted) order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Direct parents.
    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.parents.as_slice()).unwrap_or(&[])
    }

    pub fn is_read_only(&self, id: NodeId) -> bool {
        self.node(id).is_ok_and(|n| n.read_only)
    }

    /// All live nodes without parents, in arena order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Some(node) if node.parents.is_empty() => Some(NodeId(i)),
                _ => None,
            })
            .collect()
    }

    /// Link `child` under `parent`.
    ///
    /// Adding an existing edge is a no-op. If either endpoint is read-only,
    /// the whole connected component becomes read-only.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if parent == child {
            return Err(Error::SelfLink(parent));
        }
        let contagious = self.node(parent)?.read_only || self.node(child)?.read_only;
        self.link(parent, child);
        if contagious {
            self.make_read_only(parent)?;
        }
        Ok(())
    }

    /// Unlink `child` from `parent`. Returns whether an edge was removed.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<bool> {
        if self.node(parent)?.read_only {
            return Err(Error::ReadOnly(parent));
        }
        if self.node(child)?.read_only {
            return Err(Error::ReadOnly(child));
        }
        Ok(self.unlink(parent, child))
    }

    /// Freeze `id` and everything connected to it through parent or child
    /// edges. There is no way back.
    pub fn make_read_only(&mut self, id: NodeId) -> Result<()> {
        self.node(id)?;
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let node = self.node_mut(current)?;
            if node.read_only && current != id {
                continue;
            }
            node.read_only = true;
            let neighbours: Vec<NodeId> =
                node.parents.iter().chain(node.children.iter()).copied().collect();
            for next in neighbours {
                if !self.is_read_only(next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(())
    }

    /// Parentless ancestors of `id`, or `id` itself when it has no parents.
    pub fn top_level_parents(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.node(id)?;
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        let mut roots = Vec::new();
        while let Some(current) = queue.pop_front() {
            let parents = self.parents(current);
            if parents.is_empty() {
                roots.push(current);
            }
            for &parent in parents {
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(roots)
    }

    /// A single root above `id`.
    ///
    /// When `id` has several independent top-level ancestors, a new node
    /// holding `synthetic` is created and all of them are attached under it.
    pub fn top_level_parent(&mut self, id: NodeId, synthetic: T) -> Result<NodeId> {
        let roots = self.top_level_parents(id)?;
        if let [single] = roots.as_slice() {
            return Ok(*single);
        }
        let root = self.insert(synthetic);
        for top in roots {
            self.add_child(root, top)?;
        }
        Ok(root)
    }

    /// Detach `id` from the tree and free its slot.
    ///
    /// With `inherit_parents`, each former child is linked under every
    /// former parent of `id`. With `remove_orphaned_children`, children left
    /// without any parent are removed recursively. Returns every node that
    /// was removed, `id` first.
    pub fn remove_from_tree(
        &mut self,
        id: NodeId,
        inherit_parents: bool,
        remove_orphaned_children: bool,
    ) -> Result<Vec<NodeId>> {
        if self.node(id)?.read_only {
            return Err(Error::ReadOnly(id));
        }
        let parents = self.parents(id).to_vec();
        let children = self.children(id).to_vec();

        for &parent in &parents {
            self.unlink(parent, id);
        }
        for &child in &children {
            self.unlink(id, child);
        }
        self.nodes[id.0] = None;
        self.live -= 1;

        let mut removed = vec![id];
        for child in children {
            if !self.contains(child) {
                continue;
            }
            if inherit_parents {
                for &parent in &parents {
                    self.link(parent, child);
                }
            }
            if remove_orphaned_children && self.parents(child).is_empty() {
                removed.extend(self.remove_from_tree(child, inherit_parents, true)?);
            }
        }
        Ok(removed)
    }

    /// Reorder the direct children of `id`. Grandchildren are untouched.
    pub fn sort_children_by<F>(&mut self, id: NodeId, mut compare: F) -> Result<()>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        if self.node(id)?.read_only {
            return Err(Error::ReadOnly(id));
        }
        let mut children = std::mem::take(&mut self.node_mut(id)?.children);
        children.sort_by(|a, b| match (self.value(*a), self.value(*b)) {
            (Some(a), Some(b)) => compare(a, b),
            _ => Ordering::Equal,
        });
        self.node_mut(id)?.children = children;
        Ok(())
    }

    /// Every node reachable from `from` through child edges, `from` included.
    pub fn descendants(&self, from: NodeId) -> Result<HashSet<NodeId>> {
        self.node(from)?;
        let mut seen = HashSet::from([from]);
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            for &child in self.children(current) {
                if seen.insert(child) {
                    stack.push(child);
                }
            }
        }
        Ok(seen)
    }

    fn node(&self, id: NodeId) -> Result<&Node<T>> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(Error::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node<T>> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::UnknownNode(id))
    }

    /// Symmetric edge insertion. Both nodes must be live.
    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(Some(node)) = self.nodes.get_mut(parent.0)
            && !node.children.contains(&child)
        {
            node.children.push(child);
        }
        if let Some(Some(node)) = self.nodes.get_mut(child.0)
            && !node.parents.contains(&parent)
        {
            node.parents.push(parent);
        }
    }

    /// Symmetric edge removal.
    fn unlink(&mut self, parent: NodeId, child: NodeId) -> bool {
        let mut removed = false;
        if let Some(Some(node)) = self.nodes.get_mut(parent.0) {
            let before = node.children.len();
            node.children.retain(|&c| c != child);
            removed = node.children.len() != before;
        }
        if let Some(Some(node)) = self.nodes.get_mut(child.0) {
            node.parents.retain(|&p| p != parent);
        }
        removed
    }
}

impl<T: PartialEq> DependencyTree<T> {
    /// First node reachable from `from` (inclusive, depth-first) whose value
    /// equals `value`.
    pub fn find(&self, from: NodeId, value: &T) -> Option<NodeId> {
        self.flatten_depth_first(from, false)
            .ok()?
            .into_iter()
            .find(|&id| self.value(id) == Some(value))
    }

    /// Every node reachable from `from` whose value equals `value`, each
    /// node reported once.
    pub fn find_all(&self, from: NodeId, value: &T) -> Vec<NodeId> {
        self.flatten_depth_first(from, false)
            .map(|ids| {
                ids.into_iter()
                    .filter(|&id| self.value(id) == Some(value))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pre-order traversal from `from`: a node before its children, each
    /// node once. With `unique_values`, nodes whose value was already
    /// emitted are skipped (their children are still visited).
    pub fn flatten_depth_first(&self, from: NodeId, unique_values: bool) -> Result<Vec<NodeId>> {
        self.node(from)?;
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![from];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if !unique_values || !self.already_emitted(&order, current) {
                order.push(current);
            }
            for &child in self.children(current).iter().rev() {
                if !visited.contains(&child) {
                    stack.push(child);
                }
            }
        }
        Ok(order)
    }

    /// Level-by-level traversal from `from` that only emits a node once all
    /// of its parents inside the traversed subgraph have been emitted.
    ///
    /// Parents outside the subgraph reachable from `from` are ignored, so
    /// flattening from any node yields every dependent of that node.
    pub fn flatten_breadth_first(&self, from: NodeId, unique_values: bool) -> Result<Vec<NodeId>> {
        let reachable = self.descendants(from)?;
        let mut emitted: HashSet<NodeId> = HashSet::new();
        let mut order = Vec::new();
        let mut frontier = vec![from];

        while !frontier.is_empty() {
            let mut next = Vec::new();
            let mut progressed = false;

            for current in frontier {
                if emitted.contains(&current) {
                    continue;
                }
                let ready = self
                    .parents(current)
                    .iter()
                    .filter(|p| reachable.contains(p))
                    .all(|p| emitted.contains(p));
                if !ready {
                    next.push(current);
                    continue;
                }

                emitted.insert(current);
                progressed = true;
                if !unique_values || !self.already_emitted(&order, current) {
                    order.push(current);
                }
                next.extend(
                    self.children(current)
                        .iter()
                        .copied()
                        .filter(|c| !emitted.contains(c)),
                );
            }

            let mut seen = HashSet::new();
            next.retain(|id| !emitted.contains(id) && seen.insert(*id));
            if !progressed && !next.is_empty() {
                tracing::warn!(stuck = next.len(), "breadth-first flatten made no progress");
                break;
            }
            frontier = next;
        }
        Ok(order)
    }

    fn already_emitted(&self, order: &[NodeId], candidate: NodeId) -> bool {
        let value = self.value(candidate);
        order.iter().any(|&id| self.value(id) == value)
    }
}
