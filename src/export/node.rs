//! Persistent output nodes.
//!
//! Every node lives in the [`NodeTree`](super::NodeTree) arena and is
//! addressed by [`NodeId`]. Kind-specific state is a closed set of payloads
//! in [`NodeKind`]. Transient per-frame state (current value, visibility)
//! is cleared at the start of each frame unless the node is locked; the
//! last written value survives for snapshot comparison.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::names::CollisionResolver;
use super::InstanceId;
use crate::archive::ObjectHandle;
use crate::scene::{CameraSample, Primitive, PrimitiveKind, UserProperties};
use crate::util::{BBox3d, DMat4};

/// Index of a node in the tree arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

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

/// Container object backing a node, valid for one tree generation.
#[derive(Clone, Copy, Debug)]
pub struct Binding {
    pub generation: u64,
    pub handle: ObjectHandle,
    /// Samples written through this binding.
    pub samples: usize,
    /// Layer disposition the object was created with.
    pub layer: super::LayerType,
}

/// Where a transform's children came from in the sample tree.
///
/// Keys are the names the sample tree proposed; the nodes themselves may
/// carry a disambiguated name.
#[derive(Clone, Debug, Default)]
pub struct Slots {
    pub children: HashMap<String, NodeId>,
    pub shapes: BTreeMap<(String, PrimitiveKind), Vec<NodeId>>,
    pub instanced: BTreeMap<(String, PrimitiveKind), Vec<InstanceId>>,
    pub cameras: HashMap<String, NodeId>,
}

/// Transform payload.
#[derive(Clone, Debug)]
pub struct XformNode {
    pub slots: Slots,
    pub matrix: DMat4,
    pub visible: bool,
    pub user_props: Option<UserProperties>,
    pub last_matrix: Option<DMat4>,
    /// (child union, matrix, transformed bounds) of the last bounds pass.
    pub cached_bounds: Option<(BBox3d, DMat4, BBox3d)>,
}

impl Default for XformNode {
    fn default() -> Self {
        Self {
            slots: Slots::default(),
            matrix: DMat4::IDENTITY,
            visible: false,
            user_props: None,
            last_matrix: None,
            cached_bounds: None,
        }
    }
}

/// Geometry payload.
#[derive(Clone, Debug)]
pub struct ShapeNode {
    pub kind: PrimitiveKind,
    /// This frame's primitive, if the shape was visited.
    pub primitive: Option<Primitive>,
    pub visible: bool,
    pub user_props: Option<UserProperties>,
    pub subd_group: Option<String>,
    /// Last primitive written, kept for from-previous and rebinds.
    pub last: Option<Primitive>,
    /// Set while locked: `primitive` is a private deep copy.
    pub hardened: bool,
}

impl ShapeNode {
    pub fn new(kind: PrimitiveKind) -> Self {
        Self {
            kind,
            primitive: None,
            visible: false,
            user_props: None,
            subd_group: None,
            last: None,
            hardened: false,
        }
    }

    /// Primitive whose data would be written this frame.
    pub fn current(&self) -> Option<&Primitive> {
        self.primitive.as_ref().or(self.last.as_ref())
    }
}

/// Camera payload.
#[derive(Clone, Debug, Default)]
pub struct CameraNode {
    pub sample: Option<CameraSample>,
    pub last: Option<CameraSample>,
}

/// Instance payload: a reference to the shape that owns the data.
#[derive(Clone, Copy, Debug)]
pub struct InstanceNode {
    pub source: NodeId,
    pub id: InstanceId,
}

/// Closed set of node kinds.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Root(Slots),
    Xform(XformNode),
    Shape(ShapeNode),
    Camera(CameraNode),
    Instance(InstanceNode),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Root(_) => "root",
            Self::Xform(_) => "xform",
            Self::Shape(_) => "shape",
            Self::Camera(_) => "camera",
            Self::Instance(_) => "instance",
        }
    }
}

/// A persistent node.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) child_names: HashMap<String, NodeId>,
    pub(crate) resolver: CollisionResolver,
    pub(crate) kind: NodeKind,
    pub(crate) locked: bool,
    pub(crate) bounds: BBox3d,
    pub(crate) binding: Option<Binding>,
}

impl Node {
    pub(crate) fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
            parent: None,
            children: Vec::new(),
            child_names: HashMap::new(),
            resolver: CollisionResolver::new(),
            kind,
            locked: false,
            bounds: BBox3d::EMPTY,
            binding: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path, e.g. `/geo/rock`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in creation order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Bounds computed by the last save, in the parent's space.
    pub fn bounds(&self) -> BBox3d {
        self.bounds
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub(crate) fn slots(&self) -> Option<&Slots> {
        match &self.kind {
            NodeKind::Root(slots) => Some(slots),
            NodeKind::Xform(x) => Some(&x.slots),
            _ => None,
        }
    }

    pub(crate) fn slots_mut(&mut self) -> Option<&mut Slots> {
        match &mut self.kind {
            NodeKind::Root(slots) => Some(slots),
            NodeKind::Xform(x) => Some(&mut x.slots),
            _ => None,
        }
    }

    /// Drop transient per-frame state. Locked nodes keep everything.
    pub(crate) fn clear_frame(&mut self) {
        if self.locked {
            return;
        }
        match &mut self.kind {
            NodeKind::Xform(x) => {
                x.visible = false;
                x.user_props = None;
            }
            NodeKind::Shape(s) => {
                s.primitive = None;
                s.visible = false;
                s.user_props = None;
            }
            NodeKind::Camera(c) => c.sample = None,
            NodeKind::Root(_) | NodeKind::Instance(_) => {}
        }
    }
}
