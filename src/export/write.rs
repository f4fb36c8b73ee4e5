//! Save-time flush.
//!
//! Binds nodes to container objects top-down, then walks the tree
//! bottom-up computing bounds and appending samples until every bound
//! object holds one sample per frame. A node first bound on frame N gets a
//! hidden value sample, hidden from-previous samples up to N, then its
//! real sample for N.

use tracing::{debug, trace};

use super::layer::{LayerAssignment, LayerOptions, LayerType, VizType};
use super::node::{Binding, NodeId, NodeKind};
use super::{ExportOptions, NodeTree};
use crate::archive::{ContainerWriter, ObjectHandle, ObjectKind, PropertyValue, Sample, SampleValue, ShapeSample, ValueWrite, bounds_array};
use crate::core::ObjectVisibility;
use crate::scene::{Primitive, UserProperties};
use crate::util::{BBox3d, Error, Result, same_matrix};

pub(crate) struct Flush<'a, W: ContainerWriter> {
    pub tree: &'a mut NodeTree,
    pub writer: &'a mut W,
    pub layers: &'a LayerOptions,
    pub assignment: &'a LayerAssignment,
    pub options: &'a ExportOptions,
    /// Sample count every bound object must reach.
    pub nsamples: usize,
}

impl<W: ContainerWriter> Flush<'_, W> {
    pub(crate) fn run(mut self) -> Result<()> {
        let order = self.tree.subtree(self.tree.root());

        for &id in order.iter().skip(1) {
            self.ensure_bound(id)?;
        }

        let mut written = 0;
        for &id in order.iter().rev() {
            self.update_bounds(id);
            written += self.write_samples(id)?;
        }

        let root = self.tree.root();
        self.writer.set_archive_bounds(self.tree.node(root).bounds)?;
        self.check_sample_counts()?;
        debug!(samples = self.nsamples, written, "flushed frame");
        Ok(())
    }

    /// Bind `id` to a container object if it is exported. Returns the live binding.
    fn ensure_bound(&mut self, id: NodeId) -> Result<Option<Binding>> {
        if let Some(b) = self.tree.live_binding(id) {
            return Ok(Some(b));
        }
        let layer = self.assignment.get(id);
        if layer == LayerType::None {
            return Ok(None);
        }
        self.bind(id, layer)
    }

    fn bind(&mut self, id: NodeId, layer: LayerType) -> Result<Option<Binding>> {
        let node = self.tree.node(id);
        let kind = node.kind.clone();
        let name = node.name.clone();
        let Some(parent) = node.parent else {
            return Ok(None);
        };

        let object_kind = match &kind {
            NodeKind::Root(_) => return Ok(None),
            NodeKind::Xform(_) => Some(ObjectKind::Xform),
            NodeKind::Shape(s) if s.current().is_none() => return Ok(None),
            NodeKind::Shape(s) => Some(ObjectKind::from(s.kind)),
            NodeKind::Camera(c) if c.sample.is_none() && c.last.is_none() => return Ok(None),
            NodeKind::Camera(_) => Some(ObjectKind::Camera),
            NodeKind::Instance(_) => None,
        };

        let parent_handle = self.parent_handle(parent)?;

        let handle = match (object_kind, &kind) {
            (Some(object_kind), _) => {
                self.writer
                    .create_object(parent_handle, &name, object_kind, &layer.metadata(), layer.is_sparse())?
            }
            (None, NodeKind::Instance(inst)) => {
                let source = match self.ensure_bound(inst.source)? {
                    Some(b) if b.layer.writes_values() => b.handle,
                    _ => return Ok(None),
                };
                self.writer.create_instance(parent_handle, &name, source)?
            }
            (None, _) => return Ok(None),
        };

        let binding = Binding {
            generation: self.tree.generation(),
            handle,
            samples: 0,
            layer,
        };
        self.tree.node_mut(id).binding = Some(binding);
        trace!(path = %self.tree.node(id).path, ?layer, "bound node");
        Ok(Some(binding))
    }

    /// Handle of `parent`, binding it as sparse if nothing else exported it.
    fn parent_handle(&mut self, parent: NodeId) -> Result<ObjectHandle> {
        if parent == self.tree.root() {
            return Ok(self.writer.root());
        }
        if let Some(b) = self.ensure_bound(parent)? {
            return Ok(b.handle);
        }
        self.bind(parent, LayerType::Sparse)?
            .map(|b| b.handle)
            .ok_or_else(|| {
                Error::invariant(format!("ancestor {} cannot be bound", self.tree.node(parent).path))
            })
    }

    fn excluded(&self, id: NodeId) -> bool {
        self.tree
            .live_binding(id)
            .map_or(self.assignment.get(id), |b| b.layer)
            == LayerType::Prune
    }

    fn update_bounds(&mut self, id: NodeId) {
        let bounds = match &self.tree.node(id).kind {
            NodeKind::Shape(s) => s.primitive.as_ref().map_or(BBox3d::EMPTY, Primitive::bounds),
            NodeKind::Instance(inst) => match &self.tree.node(inst.source).kind {
                NodeKind::Shape(s) => s.primitive.as_ref().map_or(BBox3d::EMPTY, Primitive::bounds),
                _ => BBox3d::EMPTY,
            },
            NodeKind::Camera(_) => BBox3d::EMPTY,
            NodeKind::Root(_) => self.child_union(id),
            NodeKind::Xform(x) if !x.visible => BBox3d::EMPTY,
            NodeKind::Xform(_) => {
                let union = self.child_union(id);
                let node = self.tree.node_mut(id);
                let NodeKind::Xform(x) = &mut node.kind else {
                    return;
                };
                match x.cached_bounds {
                    Some((u, m, b)) if u.same_bits(&union) && same_matrix(&m, &x.matrix) => b,
                    _ => {
                        let b = union.transformed(&x.matrix);
                        x.cached_bounds = Some((union, x.matrix, b));
                        b
                    }
                }
            }
        };
        self.tree.node_mut(id).bounds = bounds;
    }

    fn child_union(&self, id: NodeId) -> BBox3d {
        let mut union = BBox3d::EMPTY;
        for &c in self.tree.node(id).children() {
            if !self.excluded(c) {
                union.expand_by_box(&self.tree.node(c).bounds);
            }
        }
        union
    }

    /// Append samples to `id` until it holds `nsamples`. Returns the number written.
    fn write_samples(&mut self, id: NodeId) -> Result<usize> {
        let Some(binding) = self.tree.live_binding(id) else {
            return Ok(0);
        };
        let node = self.tree.node(id);
        if binding.layer == LayerType::Prune || matches!(node.kind, NodeKind::Instance(_)) {
            return Ok(0);
        }

        let path = node.path.clone();
        let viz = self.layers.viz_type(&path, binding.layer);
        let start = binding.samples;
        for i in start..self.nsamples {
            let sample = self.next_sample(id, &path, binding.layer, viz, i)?;
            self.writer.write_sample(binding.handle, sample)?;
        }

        if let Some(b) = self.tree.node_mut(id).binding.as_mut() {
            b.samples = self.nsamples;
        }
        Ok(self.nsamples.saturating_sub(start))
    }

    fn next_sample(&mut self, id: NodeId, path: &str, layer: LayerType, viz: VizType, i: usize) -> Result<Sample> {
        let cur = i + 1 == self.nsamples;
        let sparse = layer.is_sparse();
        let full_bounds = self.options.full_bounds;
        let child_bounds = full_bounds.then(|| if cur { self.child_union(id) } else { BBox3d::EMPTY });

        let node = self.tree.node_mut(id);
        let real = i == 0 || (cur && !node.locked);

        let (value, shown, props) = match &mut node.kind {
            NodeKind::Xform(x) => {
                let last = x.last_matrix;
                let value = if sparse {
                    ValueWrite::Skip
                } else if !real {
                    ValueWrite::FromPrevious
                } else if i > 0 && last.is_some_and(|m| same_matrix(&m, &x.matrix)) {
                    ValueWrite::FromPrevious
                } else {
                    x.last_matrix = Some(x.matrix);
                    ValueWrite::Set(SampleValue::Xform(x.matrix))
                };
                (value, cur && x.visible, x.user_props.clone())
            }
            NodeKind::Shape(s) => {
                let value = if sparse {
                    ValueWrite::Skip
                } else if !real {
                    ValueWrite::FromPrevious
                } else if let Some(p) = s.primitive.clone() {
                    if i > 0 && s.last.as_ref().is_some_and(|l| l.is_same(&p)) {
                        ValueWrite::FromPrevious
                    } else {
                        let value = shape_sample(&p, s.subd_group.clone(), self.layers, path, layer);
                        s.last = Some(p);
                        ValueWrite::Set(value)
                    }
                } else if i > 0 {
                    ValueWrite::FromPrevious
                } else {
                    // Rebound after the shape stopped being proposed.
                    let last = s
                        .last
                        .as_ref()
                        .ok_or_else(|| Error::invariant(format!("{path} has no geometry to write")))?;
                    ValueWrite::Set(shape_sample(last, s.subd_group.clone(), self.layers, path, layer))
                };
                (value, cur && s.visible && s.primitive.is_some(), s.user_props.clone())
            }
            NodeKind::Camera(c) => {
                let value = if sparse {
                    ValueWrite::Skip
                } else if !real {
                    ValueWrite::FromPrevious
                } else if let Some(sample) = c.sample.clone() {
                    if i > 0 && c.last.as_ref() == Some(&sample) {
                        ValueWrite::FromPrevious
                    } else {
                        c.last = Some(sample.clone());
                        ValueWrite::Set(SampleValue::Camera(sample))
                    }
                } else if i > 0 {
                    ValueWrite::FromPrevious
                } else {
                    let last = c
                        .last
                        .clone()
                        .ok_or_else(|| Error::invariant(format!("{path} has no camera to write")))?;
                    ValueWrite::Set(SampleValue::Camera(last))
                };
                return Ok(Sample::new(value));
            }
            NodeKind::Root(_) | NodeKind::Instance(_) => {
                return Err(Error::invariant(format!("{path} does not take samples")));
            }
        };

        let visibility = match viz {
            VizType::None => None,
            VizType::Default => Some(ObjectVisibility::from_shown(shown)),
            VizType::Deferred => Some(ObjectVisibility::Deferred),
            VizType::Hidden => Some(ObjectVisibility::Hidden),
            VizType::Visible => Some(ObjectVisibility::Visible),
        };

        let mut sample = Sample::new(value).with_visibility(visibility);
        if !sparse && matches!(self.tree.node(id).kind, NodeKind::Xform(_)) {
            sample = sample.with_child_bounds(child_bounds);
        }
        if real {
            if let Some(props) = props {
                sample.user_properties = user_properties(&props, self.layers, path, layer);
            }
        }
        Ok(sample)
    }

    fn check_sample_counts(&self) -> Result<()> {
        for id in self.tree.ids() {
            let Some(b) = self.tree.live_binding(id) else {
                continue;
            };
            if b.layer == LayerType::Prune || matches!(self.tree.node(id).kind, NodeKind::Instance(_)) {
                continue;
            }
            let count = self.writer.sample_count(b.handle);
            if count != self.nsamples {
                debug_assert!(false, "sample count mismatch on {}", self.tree.node(id).path);
                return Err(Error::invariant(format!(
                    "{} has {count} samples, expected {}",
                    self.tree.node(id).path,
                    self.nsamples
                )));
            }
        }
        Ok(())
    }
}

fn shape_sample(p: &Primitive, subd_group: Option<String>, layers: &LayerOptions, path: &str, layer: LayerType) -> SampleValue {
    let mut attributes = Vec::new();
    let mut pruned_attributes = Vec::new();
    for name in p.attribute_names() {
        match layers.attr_type(path, name, layer) {
            LayerType::Full | LayerType::Replace => attributes.push(name.to_string()),
            LayerType::Prune => pruned_attributes.push(name.to_string()),
            LayerType::None | LayerType::Sparse => {}
        }
    }
    SampleValue::Shape(ShapeSample {
        geometry: p.data().clone(),
        transform: *p.transform(),
        bounds: bounds_array(p.bounds()),
        attributes,
        pruned_attributes,
        subd_group,
    })
}

fn user_properties(
    props: &UserProperties,
    layers: &LayerOptions,
    path: &str,
    layer: LayerType,
) -> Vec<(String, PropertyValue)> {
    props
        .iter()
        .filter_map(|(name, prop)| match layers.user_prop_type(path, name, layer) {
            LayerType::Full | LayerType::Replace => Some((name.to_string(), PropertyValue::Value(prop.value.clone()))),
            LayerType::Prune => Some((name.to_string(), PropertyValue::Pruned)),
            LayerType::None | LayerType::Sparse => None,
        })
        .collect()
}
