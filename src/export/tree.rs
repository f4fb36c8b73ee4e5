//! Arena-owned persistent node tree.

use tracing::{debug, warn};

use super::diagnostics::Diagnostics;
use super::node::{Node, NodeId, NodeKind, Slots};
use crate::util::{Error, Result};

/// Owns every persistent node of a session.
///
/// Nodes are never removed; parents own children by index and children
/// refer back to their parent by index. Container bindings are tagged with
/// the tree generation, so invalidating all of them is a single increment.
#[derive(Clone, Debug)]
pub struct NodeTree {
    nodes: Vec<Node>,
    generation: u64,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    pub fn new() -> Self {
        let mut root = Node::new("", NodeKind::Root(Slots::default()));
        root.path = "/".to_string();
        Self {
            nodes: vec![root],
            generation: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Node by id. Ids are only minted by this tree.
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Allocate a detached node.
    pub(crate) fn alloc(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name, kind));
        id
    }

    /// Attach a detached node under `parent`.
    pub(crate) fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if parent == child || self.get(parent).is_none() || self.get(child).is_none() {
            return Err(Error::invariant(format!("cannot parent {child} under {parent}")));
        }
        if let Some(old) = self.node(child).parent {
            return Err(Error::invariant(format!(
                "{} is already a child of {}",
                self.node(child).name,
                self.node(old).path
            )));
        }
        if matches!(self.node(parent).kind, NodeKind::Shape(_) | NodeKind::Camera(_) | NodeKind::Instance(_)) {
            return Err(Error::invariant(format!("{} cannot have children", self.node(parent).path)));
        }

        let name = self.node(child).name.clone();
        if self.node(parent).child_names.contains_key(&name) {
            return Err(Error::invariant(format!(
                "duplicate child {name} under {}",
                self.node(parent).path
            )));
        }

        let path = join_path(&self.node(parent).path, &name);
        let p = self.node_mut(parent);
        p.resolver.add(&name);
        p.child_names.insert(name, child);
        p.children.push(child);

        let c = self.node_mut(child);
        c.parent = Some(parent);
        c.path = path;
        Ok(())
    }

    /// `candidate`, or a suffixed variant if a sibling already uses it.
    pub(crate) fn make_collision_free_name(
        &mut self,
        parent: NodeId,
        candidate: &str,
        diagnostics: &mut Diagnostics,
    ) -> String {
        let p = self.node_mut(parent);
        if !p.child_names.contains_key(candidate) {
            return candidate.to_string();
        }
        let name = p.resolver.resolve(candidate);
        let path = join_path(&p.path, &name);
        warn!(%path, "renamed colliding node");
        diagnostics.warn(format!("Renaming node to {path} to resolve collision."));
        name
    }

    /// Create a node under `parent` with a collision-free name.
    pub(crate) fn create_child(
        &mut self,
        parent: NodeId,
        candidate: &str,
        kind: NodeKind,
        diagnostics: &mut Diagnostics,
    ) -> Result<NodeId> {
        let name = self.make_collision_free_name(parent, candidate, diagnostics);
        let label = kind.label();
        let id = self.alloc(name, kind);
        self.add_child(parent, id)?;
        debug!(path = %self.node(id).path, kind = label, "created node");
        Ok(id)
    }

    /// Node at a full path such as `/geo/rock`.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut id = self.root();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            id = *self.node(id).child_names.get(part)?;
        }
        Some(id)
    }

    /// `id` and all its descendants, parents before children.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.node(n).children.iter().rev());
        }
        out
    }

    /// Set or clear the lock flag on a subtree.
    pub(crate) fn set_locked(&mut self, id: NodeId, locked: bool) {
        for n in self.subtree(id) {
            self.node_mut(n).locked = locked;
        }
    }

    /// Clear transient per-frame state on every unlocked node.
    pub(crate) fn clear_frame(&mut self) {
        for node in &mut self.nodes {
            node.clear_frame();
        }
    }

    /// Invalidate every container binding.
    pub(crate) fn purge(&mut self) {
        self.generation += 1;
        debug!(generation = self.generation, nodes = self.nodes.len(), "purged bindings");
    }

    /// Binding of `id` if it belongs to the current generation.
    pub(crate) fn live_binding(&self, id: NodeId) -> Option<super::node::Binding> {
        self.node(id)
            .binding
            .filter(|b| b.generation == self.generation)
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
