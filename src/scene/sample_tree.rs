//! Per-frame sample source tree.
//!
//! The refinement step describes the current frame as a tree of proposed
//! transforms. Each transform lists the shapes, instanced shapes and
//! cameras it holds, grouped by name and geometry kind, in the order they
//! were produced. Nothing here has identity across frames; reconciliation
//! matches it against the persistent node tree.
//!
//! Packed geometry goes through [`SampleTree::add_packed`], which computes
//! the content key, registers the geometry in the frame's instance table and
//! places the packed transform according to [`PackedTransform`].

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::export::ExportOptions;
use crate::scene::{
    CameraSample, ContentKey, ContentKeySource, GeometrySource, Primitive, PrimitiveKind,
    UserProperties,
};
use crate::util::{DMat4, Error, Result};

/// Where the transform of packed or instanced geometry ends up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackedTransform {
    /// Fold the transform into the points; no instancing.
    #[default]
    DeformGeometry,
    /// Add a transform node per packed primitive.
    TransformGeometry,
    /// Push the transform into the parent transform node.
    MergeWithParentTransform,
}

/// A proposed, non-instanced shape.
#[derive(Clone, Debug)]
pub struct ShapeEntry {
    pub primitive: Primitive,
    pub visible: bool,
    pub user_props: Option<UserProperties>,
    pub subd_group: Option<String>,
}

impl ShapeEntry {
    pub fn new(primitive: Primitive) -> Self {
        Self {
            primitive,
            visible: true,
            user_props: None,
            subd_group: None,
        }
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_user_props(mut self, props: UserProperties) -> Self {
        self.user_props = Some(props);
        self
    }

    pub fn with_subd_group(mut self, group: impl Into<String>) -> Self {
        self.subd_group = Some(group.into());
        self
    }
}

/// A proposed reference into the frame's instance table.
#[derive(Clone, Debug)]
pub struct InstanceEntry {
    pub key: ContentKey,
    pub index: usize,
    pub visible: bool,
    pub user_props: Option<UserProperties>,
    pub subd_group: Option<String>,
}

/// Packed geometry as delivered by the refinement step.
#[derive(Clone, Debug)]
pub struct PackedGeometry {
    pub source: GeometrySource,
    /// Refined contents, in local space of the packed primitive.
    pub primitives: Vec<Primitive>,
    pub transform: DMat4,
    pub visible: bool,
    /// Export polygons as subdivision surfaces.
    pub subd: bool,
    /// Subdivision group stamped on the subdivision surfaces.
    pub subd_group: Option<String>,
    pub user_props: Option<UserProperties>,
}

impl PackedGeometry {
    pub fn new(source: GeometrySource, primitives: Vec<Primitive>) -> Self {
        Self {
            source,
            primitives,
            transform: DMat4::IDENTITY,
            visible: true,
            subd: false,
            subd_group: None,
            user_props: None,
        }
    }

    pub fn with_transform(mut self, transform: DMat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_subd(mut self, subd: bool) -> Self {
        self.subd = subd;
        self
    }

    pub fn with_subd_group(mut self, group: impl Into<String>) -> Self {
        self.subd_group = Some(group.into());
        self
    }

    pub fn content_key(&self) -> ContentKey {
        self.source.content_key(self.subd)
    }

    fn primitive(&self, prim: &Primitive) -> Primitive {
        if self.subd && prim.kind() == PrimitiveKind::PolyMesh {
            prim.as_kind(PrimitiveKind::SubD)
        } else {
            prim.clone()
        }
    }

    fn subd_group(&self, kind: PrimitiveKind) -> Option<String> {
        match kind {
            PrimitiveKind::SubD => self.subd_group.clone(),
            _ => None,
        }
    }
}

/// One proposed transform and everything directly under it.
#[derive(Clone, Debug)]
pub struct SampleNode {
    name: String,
    xform: DMat4,
    pre_xform: DMat4,
    pre_xform_claimed: bool,
    user_props: Option<UserProperties>,
    children: BTreeMap<String, SampleNode>,
    shapes: BTreeMap<String, BTreeMap<PrimitiveKind, Vec<ShapeEntry>>>,
    instanced: BTreeMap<String, BTreeMap<PrimitiveKind, Vec<InstanceEntry>>>,
    cameras: BTreeMap<String, CameraSample>,
    instance_counts: HashMap<String, usize>,
    packed_counts: HashMap<String, usize>,
}

impl SampleNode {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xform: DMat4::IDENTITY,
            pre_xform: DMat4::IDENTITY,
            pre_xform_claimed: false,
            user_props: None,
            children: BTreeMap::new(),
            shapes: BTreeMap::new(),
            instanced: BTreeMap::new(),
            cameras: BTreeMap::new(),
            instance_counts: HashMap::new(),
            packed_counts: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the named child transform, creating it if needed.
    pub fn child_xform(&mut self, name: &str) -> &mut SampleNode {
        self.children
            .entry(name.to_string())
            .or_insert_with(|| SampleNode::new(name))
    }

    pub fn set_xform(&mut self, m: DMat4) -> &mut Self {
        self.xform = m;
        self
    }

    pub fn xform(&self) -> &DMat4 {
        &self.xform
    }

    /// Claim the pre-transform slot. Only the first claimant per frame wins.
    pub fn set_pre_xform(&mut self, m: DMat4) -> bool {
        if self.pre_xform_claimed {
            return false;
        }
        self.pre_xform = m;
        self.pre_xform_claimed = true;
        true
    }

    pub fn pre_xform(&self) -> &DMat4 {
        &self.pre_xform
    }

    /// Local transform handed to the persistent node: the pre-transform applies first.
    pub fn merged_xform(&self) -> DMat4 {
        self.xform * self.pre_xform
    }

    pub fn set_user_props(&mut self, props: UserProperties) -> &mut Self {
        self.user_props = Some(props);
        self
    }

    pub fn user_props(&self) -> Option<&UserProperties> {
        self.user_props.as_ref()
    }

    /// Add a non-instanced shape under `name`.
    pub fn append_shape(&mut self, name: &str, entry: ShapeEntry) -> &mut Self {
        self.shapes
            .entry(name.to_string())
            .or_default()
            .entry(entry.primitive.kind())
            .or_default()
            .push(entry);
        self
    }

    /// Add an instanced shape referencing `kind`/`entry.index` of `entry.key`.
    pub fn append_instanced_shape(&mut self, name: &str, kind: PrimitiveKind, entry: InstanceEntry) {
        self.instanced
            .entry(name.to_string())
            .or_default()
            .entry(kind)
            .or_default()
            .push(entry);
    }

    /// Set the camera called `name`.
    pub fn set_camera(&mut self, name: &str, sample: CameraSample) -> &mut Self {
        self.cameras.insert(name.to_string(), sample);
        self
    }

    pub fn children(&self) -> &BTreeMap<String, SampleNode> {
        &self.children
    }

    pub fn shapes(&self) -> &BTreeMap<String, BTreeMap<PrimitiveKind, Vec<ShapeEntry>>> {
        &self.shapes
    }

    pub fn instanced_shapes(&self) -> &BTreeMap<String, BTreeMap<PrimitiveKind, Vec<InstanceEntry>>> {
        &self.instanced
    }

    pub fn cameras(&self) -> &BTreeMap<String, CameraSample> {
        &self.cameras
    }

    fn next_instance_id(&mut self, name: &str) -> usize {
        let n = self.instance_counts.entry(name.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    fn next_packed_id(&mut self, name: &str) -> usize {
        let n = self.packed_counts.entry(name.to_string()).or_insert(0);
        *n += 1;
        *n
    }
}

/// Which counter names the per-primitive transform node.
#[derive(Clone, Copy)]
enum Placement {
    Packed,
    Instance,
}

/// The full per-frame proposal.
#[derive(Clone, Debug)]
pub struct SampleTree {
    root: SampleNode,
    instances: HashMap<ContentKey, BTreeMap<PrimitiveKind, Vec<Primitive>>>,
    warnings: Vec<(String, String)>,
}

impl Default for SampleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleTree {
    pub fn new() -> Self {
        Self {
            root: SampleNode::new(""),
            instances: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn root(&self) -> &SampleNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut SampleNode {
        &mut self.root
    }

    /// Node at `path` ("/" or "" is the root).
    pub fn node(&self, path: &str) -> Option<&SampleNode> {
        let mut node = &self.root;
        for part in split_path(path) {
            node = node.children.get(part)?;
        }
        Some(node)
    }

    /// Mutable node at `path`.
    pub fn node_mut(&mut self, path: &str) -> Option<&mut SampleNode> {
        let mut node = &mut self.root;
        for part in split_path(path) {
            node = node.children.get_mut(part)?;
        }
        Some(node)
    }

    /// Node at `path`, creating missing transforms along the way.
    pub fn ensure_xform(&mut self, path: &str) -> &mut SampleNode {
        let mut node = &mut self.root;
        for part in split_path(path) {
            node = node.child_xform(part);
        }
        node
    }

    /// Geometry registered for `key`, `kind` at `index` this frame.
    pub fn instance_primitive(&self, key: &ContentKey, kind: PrimitiveKind, index: usize) -> Option<&Primitive> {
        self.instances.get(key)?.get(&kind)?.get(index)
    }

    /// Number of distinct content keys defined this frame.
    pub fn instance_key_count(&self) -> usize {
        self.instances.len()
    }

    /// Warnings raised while building, as (dedup key, message) pairs.
    pub fn warnings(&self) -> &[(String, String)] {
        &self.warnings
    }

    /// Record that the upstream cook of `path` failed this frame.
    ///
    /// The node is simply left out of the tree, so reconciliation hides it.
    pub fn report_cook_failure(&mut self, path: &str, message: &str) {
        warn!(path, reason = message, "cook failed");
        self.warnings.push((
            format!("cook:{path}:{message}"),
            format!("Error cooking {path}: {message}"),
        ));
    }

    /// Add one packed primitive named `name` under the transform at `parent`.
    pub fn add_packed(
        &mut self,
        parent: &str,
        name: &str,
        packed: &PackedGeometry,
        options: &ExportOptions,
    ) -> Result<()> {
        self.place(parent, name, packed, packed.transform, Placement::Packed, options)
    }

    /// Add an instance array: the same packed geometry at every transform in `transforms`.
    pub fn add_instances(
        &mut self,
        parent: &str,
        name: &str,
        packed: &PackedGeometry,
        transforms: &[DMat4],
        options: &ExportOptions,
    ) -> Result<()> {
        for t in transforms {
            self.place(parent, name, packed, *t * packed.transform, Placement::Instance, options)?;
        }
        Ok(())
    }

    fn place(
        &mut self,
        parent: &str,
        name: &str,
        packed: &PackedGeometry,
        transform: DMat4,
        placement: Placement,
        options: &ExportOptions,
    ) -> Result<()> {
        if self.node(parent).is_none() {
            return Err(Error::config(format!("Transform {parent} not found")));
        }

        if !options.use_instancing || options.packed_transform == PackedTransform::DeformGeometry {
            let node = self.ensure_xform(parent);
            for prim in &packed.primitives {
                let prim = packed.primitive(prim);
                let mut entry = ShapeEntry::new(prim.folded(&transform)).with_visible(packed.visible);
                entry.user_props = packed.user_props.clone();
                entry.subd_group = packed.subd_group(prim.kind());
                node.append_shape(name, entry);
            }
            return Ok(());
        }

        let key = packed.content_key();
        let indices = self.define_instance(key, packed);

        let is_root = split_path(parent).next().is_none();
        let mut warning = None;
        let target = {
            let node = self.ensure_xform(parent);
            match options.packed_transform {
                PackedTransform::TransformGeometry => {
                    let child = match placement {
                        Placement::Packed => format!("{name}_packed{}", node.next_packed_id(name)),
                        Placement::Instance => format!("{name}_instance{}", node.next_instance_id(name)),
                    };
                    let child = node.child_xform(&child);
                    child.set_xform(transform);
                    child
                }
                _ => {
                    if is_root {
                        warning = Some((
                            "pushup:/".to_string(),
                            "Cannot push packed primitive transform to root node.".to_string(),
                        ));
                    } else if !node.set_pre_xform(transform) {
                        warning = Some((
                            format!("pushup:{parent}"),
                            format!("Cannot push multiple packed primitive transforms to {parent}."),
                        ));
                    }
                    node
                }
            }
        };

        for (kind, index) in indices {
            target.append_instanced_shape(
                name,
                kind,
                InstanceEntry {
                    key,
                    index,
                    visible: packed.visible,
                    user_props: packed.user_props.clone(),
                    subd_group: packed.subd_group(kind),
                },
            );
        }

        if let Some((dedup, message)) = warning {
            if !self.warnings.iter().any(|(k, _)| *k == dedup) {
                warn!("{message}");
                self.warnings.push((dedup, message));
            }
        }
        Ok(())
    }

    /// Register the geometry of `packed` under `key` and return the
    /// (kind, index) pairs its primitives map to.
    ///
    /// The first occurrence of a key this frame defines the geometry; later
    /// occurrences reuse it by per-kind position.
    fn define_instance(&mut self, key: ContentKey, packed: &PackedGeometry) -> Vec<(PrimitiveKind, usize)> {
        let defined = self.instances.contains_key(&key);
        let table = self.instances.entry(key).or_default();
        let mut counters: HashMap<PrimitiveKind, usize> = HashMap::new();
        let mut out = Vec::with_capacity(packed.primitives.len());

        for prim in &packed.primitives {
            let prim = packed.primitive(prim);
            let kind = prim.kind();
            let list = table.entry(kind).or_default();
            let index = if defined {
                let counter = counters.entry(kind).or_insert(0);
                let index = *counter;
                *counter += 1;
                if index >= list.len() {
                    list.push(prim);
                }
                index
            } else {
                list.push(prim);
                list.len() - 1
            };
            out.push((kind, index));
        }

        if !defined {
            debug!(%key, prims = out.len(), "defined instance geometry");
        }
        out
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|p| !p.is_empty())
}
