//! Per-frame reconciliation of a sample tree against the persistent tree.
//!
//! Runs in two passes over matching (sample node, persistent node) pairs:
//!
//! 1. Assign every proposed instance to an existing [`InstanceId`] found at
//!    the same transform under the same name and kind. The id that served
//!    the same content key last frame is preferred, otherwise the first
//!    unassigned id in creation order is taken.
//! 2. Walk top-down again: reuse shapes positionally per (name, kind),
//!    allocate instance sources for unassigned keys, update each source at
//!    most once per frame, add instance references where a transform holds
//!    fewer of them than proposed, and derive transform visibility.
//!
//! Locked subtrees are skipped entirely. Nodes created before a failure
//! are kept; their sample history stays consistent because writing is a
//! separate step.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use super::instance::{InstanceId, InstanceKey, InstanceRegistry};
use super::node::{CameraNode, InstanceNode, NodeId, NodeKind, ShapeNode, XformNode};
use super::{Diagnostics, NodeTree};
use crate::scene::{CameraSample, Primitive, PrimitiveKind, SampleNode, SampleTree, UserProperties};
use crate::util::{Error, Result};

/// What a merge did, for logging and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Persistent nodes created.
    pub created: usize,
    /// Instance sources allocated.
    pub new_sources: usize,
}

pub(crate) struct Merger<'a> {
    tree: &'a mut NodeTree,
    registry: &'a mut InstanceRegistry,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> Merger<'a> {
    pub(crate) fn new(
        tree: &'a mut NodeTree,
        registry: &'a mut InstanceRegistry,
        diagnostics: &'a mut Diagnostics,
    ) -> Self {
        Self {
            tree,
            registry,
            diagnostics,
        }
    }

    pub(crate) fn merge(mut self, sample: &SampleTree) -> Result<MergeStats> {
        let before = self.tree.len();
        let sources_before = self.registry.len();

        let mapping = self.assign_instances(sample);
        self.update(sample, mapping)?;

        let stats = MergeStats {
            created: self.tree.len() - before,
            new_sources: self.registry.len() - sources_before,
        };
        debug!(created = stats.created, new_sources = stats.new_sources, "merged sample tree");
        Ok(stats)
    }

    /// First pass: map proposed instance keys to existing instance ids.
    fn assign_instances(&self, sample: &SampleTree) -> HashMap<InstanceKey, InstanceId> {
        let mut mapping: HashMap<InstanceKey, InstanceId> = HashMap::new();
        let mut assigned: HashSet<InstanceId> = HashSet::new();

        let root = self.tree.root();
        let mut work: Vec<(&SampleNode, NodeId)> = vec![(sample.root(), root)];
        while let Some((n1, n2)) = work.pop() {
            let node = self.tree.node(n2);
            if node.is_locked() && n2 != root {
                continue;
            }
            let Some(slots) = node.slots() else {
                continue;
            };

            for (name, kinds) in n1.instanced_shapes() {
                for (kind, entries) in kinds {
                    let Some(existing) = slots.instanced.get(&(name.clone(), *kind)) else {
                        continue;
                    };
                    let keys = entries.iter().map(|e| InstanceKey {
                        kind: *kind,
                        key: e.key,
                        index: e.index,
                    });

                    for key in keys.clone() {
                        if mapping.contains_key(&key) {
                            continue;
                        }
                        if let Some(id) = self.registry.preferred(&key) {
                            if existing.contains(&id) && assigned.insert(id) {
                                mapping.insert(key, id);
                            }
                        }
                    }

                    let mut i2 = 0;
                    for key in keys {
                        if mapping.contains_key(&key) {
                            continue;
                        }
                        while i2 < existing.len() {
                            let id = existing[i2];
                            i2 += 1;
                            if assigned.insert(id) {
                                mapping.insert(key, id);
                                break;
                            }
                        }
                    }
                }
            }

            for (name, child) in n1.children() {
                if let Some(&id) = slots.children.get(name) {
                    work.push((child, id));
                }
            }
        }
        mapping
    }

    /// Second pass: create, update and hide nodes.
    fn update(&mut self, sample: &SampleTree, mut mapping: HashMap<InstanceKey, InstanceId>) -> Result<()> {
        let mut updated: HashSet<InstanceId> = HashSet::new();
        let root = self.tree.root();

        let mut work: Vec<(&SampleNode, NodeId, bool)> = vec![(sample.root(), root, true)];
        while let Some((n1, n2, mut visible)) = work.pop() {
            let mut should_be_visible = false;
            let mut should_be_invisible = !visible;

            for (name, kinds) in n1.shapes() {
                for (kind, entries) in kinds {
                    for (i, entry) in entries.iter().enumerate() {
                        should_be_visible |= entry.visible;
                        let id = self.shape_slot(n2, name, *kind, i)?;
                        self.set_shape(
                            id,
                            entry.primitive.clone(),
                            entry.visible,
                            entry.user_props.as_ref(),
                            entry.subd_group.as_deref(),
                        );
                    }
                }
            }

            let slots = self
                .tree
                .node(n2)
                .slots()
                .ok_or_else(|| Error::invariant(format!("{} is not a transform", self.tree.node(n2).path())))?;
            let mut names: BTreeSet<(String, PrimitiveKind)> = slots.instanced.keys().cloned().collect();
            for (name, kinds) in n1.instanced_shapes() {
                names.extend(kinds.keys().map(|k| (name.clone(), *k)));
            }

            for (name, kind) in names {
                let existing = self
                    .tree
                    .node(n2)
                    .slots()
                    .and_then(|s| s.instanced.get(&(name.clone(), kind)))
                    .cloned()
                    .unwrap_or_default();
                let mut unvisited: HashMap<InstanceId, usize> = HashMap::new();
                for id in existing {
                    *unvisited.entry(id).or_insert(0) += 1;
                }

                let entries = n1
                    .instanced_shapes()
                    .get(&name)
                    .and_then(|m| m.get(&kind))
                    .map(Vec::as_slice)
                    .unwrap_or_default();

                for entry in entries {
                    let prim = sample.instance_primitive(&entry.key, kind, entry.index).ok_or_else(|| {
                        Error::invariant(format!(
                            "instance {}[{}] of {name} has no geometry",
                            entry.key, entry.index
                        ))
                    })?;
                    if entry.visible {
                        should_be_visible = true;
                    } else {
                        should_be_invisible = true;
                    }

                    let key = InstanceKey {
                        kind,
                        key: entry.key,
                        index: entry.index,
                    };
                    match mapping.get(&key).copied() {
                        None => {
                            let id = self.registry.next_id();
                            let source = self.new_instance_source(n2, &name, kind, id)?;
                            self.set_shape(source, prim.clone(), true, entry.user_props.as_ref(), entry.subd_group.as_deref());
                            self.registry.register(key, id, source);
                            updated.insert(id);
                            mapping.insert(key, id);
                        }
                        Some(id) => {
                            self.registry.remember(key, id);
                            let source = self
                                .registry
                                .source(kind, id)
                                .ok_or_else(|| Error::invariant(format!("instance {id} has no source")))?;
                            if updated.insert(id) {
                                self.set_shape(source, prim.clone(), true, entry.user_props.as_ref(), entry.subd_group.as_deref());
                            }
                            match unvisited.get_mut(&id) {
                                None => self.new_instance_ref(n2, &name, kind, id, source)?,
                                Some(count) => {
                                    *count -= 1;
                                    if *count == 0 {
                                        unvisited.remove(&id);
                                    }
                                }
                            }
                        }
                    }
                }

                if !unvisited.is_empty() {
                    should_be_invisible = true;
                }
            }

            if should_be_visible && should_be_invisible {
                self.warn_instance_visibility(n2);
            }
            if !should_be_visible && should_be_invisible {
                visible = false;
            }
            if n2 != root {
                self.set_visibility(n2, visible);
            } else if !visible {
                self.warn_instance_visibility(n2);
            }

            for (name, camera) in n1.cameras() {
                self.set_camera(n2, name, camera)?;
            }

            for (name, child) in n1.children().iter().rev() {
                if let Some(id) = self.set_child(n2, name, child)? {
                    work.push((child, id, visible));
                }
            }
        }
        Ok(())
    }

    fn warn_instance_visibility(&mut self, id: NodeId) {
        let path = self.tree.node(id).path().to_string();
        self.diagnostics
            .warn_once(format!("hide:{path}"), "Cannot hide some instanced geometry.");
    }

    /// Fetch or create the child transform proposed as `name`. `None` if it is locked.
    fn set_child(&mut self, parent: NodeId, name: &str, sample: &SampleNode) -> Result<Option<NodeId>> {
        let existing = self
            .tree
            .node(parent)
            .slots()
            .and_then(|s| s.children.get(name).copied());
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.tree.create_child(
                    parent,
                    name,
                    NodeKind::Xform(XformNode::default()),
                    self.diagnostics,
                )?;
                self.slots_mut(parent)?.children.insert(name.to_string(), id);
                id
            }
        };

        let node = self.tree.node_mut(id);
        if node.locked {
            return Ok(None);
        }
        match &mut node.kind {
            NodeKind::Xform(x) => {
                x.matrix = sample.merged_xform();
                x.user_props = sample.user_props().cloned();
            }
            _ => return Err(Error::invariant(format!("{} is not a transform", node.path))),
        }
        Ok(Some(id))
    }

    /// Shape `i` of (`name`, `kind`) under `parent`, creating shapes up to it.
    fn shape_slot(&mut self, parent: NodeId, name: &str, kind: PrimitiveKind, i: usize) -> Result<NodeId> {
        let slot = (name.to_string(), kind);
        loop {
            let len = self
                .tree
                .node(parent)
                .slots()
                .and_then(|s| s.shapes.get(&slot))
                .map_or(0, Vec::len);
            if len > i {
                break;
            }
            let id = self
                .tree
                .create_child(parent, name, NodeKind::Shape(ShapeNode::new(kind)), self.diagnostics)?;
            self.slots_mut(parent)?.shapes.entry(slot.clone()).or_default().push(id);
        }
        self.tree
            .node(parent)
            .slots()
            .and_then(|s| s.shapes.get(&slot))
            .and_then(|list| list.get(i).copied())
            .ok_or_else(|| Error::invariant(format!("missing shape slot {name}[{i}]")))
    }

    fn set_shape(
        &mut self,
        id: NodeId,
        primitive: Primitive,
        visible: bool,
        user_props: Option<&UserProperties>,
        subd_group: Option<&str>,
    ) {
        let node = self.tree.node_mut(id);
        if node.locked {
            return;
        }
        if let NodeKind::Shape(s) = &mut node.kind {
            s.primitive = Some(primitive);
            s.visible = visible;
            s.user_props = user_props.cloned();
            s.subd_group = subd_group.map(str::to_string);
        }
    }

    fn new_instance_source(&mut self, parent: NodeId, name: &str, kind: PrimitiveKind, id: InstanceId) -> Result<NodeId> {
        self.slots_mut(parent)?
            .instanced
            .entry((name.to_string(), kind))
            .or_default()
            .push(id);
        self.tree
            .create_child(parent, name, NodeKind::Shape(ShapeNode::new(kind)), self.diagnostics)
    }

    fn new_instance_ref(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: PrimitiveKind,
        id: InstanceId,
        source: NodeId,
    ) -> Result<()> {
        self.slots_mut(parent)?
            .instanced
            .entry((name.to_string(), kind))
            .or_default()
            .push(id);
        self.tree.create_child(
            parent,
            name,
            NodeKind::Instance(InstanceNode { source, id }),
            self.diagnostics,
        )?;
        Ok(())
    }

    fn set_camera(&mut self, parent: NodeId, name: &str, sample: &CameraSample) -> Result<()> {
        let existing = self
            .tree
            .node(parent)
            .slots()
            .and_then(|s| s.cameras.get(name).copied());
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.tree.create_child(
                    parent,
                    name,
                    NodeKind::Camera(CameraNode::default()),
                    self.diagnostics,
                )?;
                self.slots_mut(parent)?.cameras.insert(name.to_string(), id);
                id
            }
        };
        let node = self.tree.node_mut(id);
        if !node.locked {
            if let NodeKind::Camera(c) = &mut node.kind {
                c.sample = Some(sample.clone());
            }
        }
        Ok(())
    }

    fn set_visibility(&mut self, id: NodeId, visible: bool) {
        let node = self.tree.node_mut(id);
        if node.locked {
            return;
        }
        if let NodeKind::Xform(x) = &mut node.kind {
            x.visible = visible;
        }
    }

    fn slots_mut(&mut self, id: NodeId) -> Result<&mut super::node::Slots> {
        let node = self.tree.node_mut(id);
        let path = node.path.clone();
        node.slots_mut()
            .ok_or_else(|| Error::invariant(format!("{path} is not a transform")))
    }
}
