//! Instance registry.
//!
//! Owned by the export session and passed into reconciliation explicitly.
//! Each [`InstanceId`] names one shared geometry source: the shape node
//! that writes the data. Every other reference to it is an instance node.

use std::collections::HashMap;
use std::fmt;

use super::NodeId;
use crate::scene::{ContentKey, PrimitiveKind};

/// Session-unique id of an instanced geometry source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub(crate) u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// A proposed instance as it appears in a sample tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub kind: PrimitiveKind,
    pub key: ContentKey,
    pub index: usize,
}

/// Sources allocated so far and the keys they were last matched to.
#[derive(Clone, Debug, Default)]
pub struct InstanceRegistry {
    next_id: u64,
    sources: HashMap<(PrimitiveKind, InstanceId), NodeId>,
    keys: HashMap<InstanceId, InstanceKey>,
    affinity: HashMap<InstanceKey, InstanceId>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the id for a new source.
    pub(crate) fn next_id(&mut self) -> InstanceId {
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register `node` as the source for `id`.
    pub(crate) fn register(&mut self, key: InstanceKey, id: InstanceId, node: NodeId) {
        self.sources.insert((key.kind, id), node);
        self.remember(key, id);
    }

    /// Record that `key` was served by `id` this frame.
    pub(crate) fn remember(&mut self, key: InstanceKey, id: InstanceId) {
        if let Some(old) = self.keys.insert(id, key) {
            if old != key && self.affinity.get(&old) == Some(&id) {
                self.affinity.remove(&old);
            }
        }
        self.affinity.insert(key, id);
    }

    /// Id that served `key` most recently.
    pub fn preferred(&self, key: &InstanceKey) -> Option<InstanceId> {
        self.affinity.get(key).copied()
    }

    /// Shape node that writes the data for `id`.
    pub fn source(&self, kind: PrimitiveKind, id: InstanceId) -> Option<NodeId> {
        self.sources.get(&(kind, id)).copied()
    }

    /// Number of allocated sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{ContentKeySource, GeometrySource};

    fn key(id: u64, index: usize) -> InstanceKey {
        InstanceKey {
            kind: PrimitiveKind::PolyMesh,
            key: GeometrySource::Inline { geometry_id: id }.content_key(false),
            index,
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = InstanceRegistry::new();
        let id = reg.next_id();
        reg.register(key(1, 0), id, NodeId(4));

        assert_eq!(reg.source(PrimitiveKind::PolyMesh, id), Some(NodeId(4)));
        assert_eq!(reg.source(PrimitiveKind::Points, id), None);
        assert_eq!(reg.preferred(&key(1, 0)), Some(id));
        assert_eq!(reg.len(), 1);
        assert_ne!(reg.next_id(), id);
    }

    #[test]
    fn test_remember_moves_affinity() {
        let mut reg = InstanceRegistry::new();
        let id = reg.next_id();
        reg.register(key(1, 0), id, NodeId(1));
        reg.remember(key(2, 0), id);

        assert_eq!(reg.preferred(&key(1, 0)), None);
        assert_eq!(reg.preferred(&key(2, 0)), Some(id));
        assert_eq!(reg.keys.get(&id), Some(&key(2, 0)));
    }
}
