//! JSON scene scripts.
//!
//! A script carries export options, layer rules, a named geometry library
//! and one entry per frame describing the scene at that frame:
//!
//! ```json
//! {
//!   "options": { "packed_transform": "transform_geometry" },
//!   "layers": { "nodes": [{ "pattern": "/geo/*", "layer": "full" }] },
//!   "geometry": { "rock": { "positions": [[0,0,0],[1,1,1]] } },
//!   "frames": [
//!     { "shapes": [{ "parent": "/geo", "name": "rock", "geometry": "rock" }] }
//!   ]
//! }
//! ```
//!
//! Geometry is shared between frames by name, so an unchanged shape is
//! written as a from-previous sample.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use alembic_export::archive::MemoryArchive;
use alembic_export::export::{Diagnostics, ExportOptions, ExportSession, LayerOptions, LayerType, VizType};
use alembic_export::scene::{
    CameraSample, GeometryData, GeometrySource, PackedGeometry, Primitive, PrimitiveKind, SampleTree, ShapeEntry,
    UserProperties,
};
use alembic_export::util::{matrix_from_cols, DMat4, DVec3};
use alembic_export::{Error, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Script {
    pub options: ExportOptions,
    pub layers: LayerRules,
    pub geometry: BTreeMap<String, GeometryData>,
    pub frames: Vec<Frame>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LayerRules {
    pub nodes: Vec<NodeRule>,
    pub viz: Vec<VizRule>,
    pub attrs: Vec<ScopedRule>,
    pub user_props: Vec<ScopedRule>,
}

#[derive(Debug, Deserialize)]
pub struct NodeRule {
    pub pattern: String,
    pub layer: LayerType,
}

#[derive(Debug, Deserialize)]
pub struct VizRule {
    pub pattern: String,
    pub viz: VizType,
}

#[derive(Debug, Deserialize)]
pub struct ScopedRule {
    pub pattern: String,
    pub names: String,
    pub layer: LayerType,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Frame {
    pub xforms: Vec<XformOp>,
    pub shapes: Vec<ShapeOp>,
    pub packed: Vec<PackedOp>,
    pub cameras: Vec<CameraOp>,
    pub failures: Vec<FailureOp>,
    pub lock: Vec<String>,
    pub unlock: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct XformOp {
    pub path: String,
    #[serde(default)]
    pub translate: Option<[f64; 3]>,
    #[serde(default)]
    pub matrix: Option<[f64; 16]>,
    #[serde(default)]
    pub user_props: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ShapeOp {
    pub parent: String,
    pub name: String,
    pub geometry: String,
    #[serde(default = "polymesh")]
    pub kind: PrimitiveKind,
    #[serde(default = "yes")]
    pub visible: bool,
    #[serde(default)]
    pub translate: Option<[f64; 3]>,
    #[serde(default)]
    pub subd_group: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PackedOp {
    pub parent: String,
    pub name: String,
    pub source: GeometrySource,
    pub geometry: Vec<String>,
    #[serde(default = "polymesh")]
    pub kind: PrimitiveKind,
    /// One translation per placed copy; a single copy at the origin if empty.
    #[serde(default)]
    pub translate: Vec<[f64; 3]>,
    #[serde(default = "yes")]
    pub visible: bool,
    #[serde(default)]
    pub subd: bool,
    #[serde(default)]
    pub subd_group: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CameraOp {
    pub parent: String,
    pub name: String,
    #[serde(default)]
    pub camera: CameraSample,
}

#[derive(Debug, Deserialize)]
pub struct FailureOp {
    pub path: String,
    pub message: String,
}

fn yes() -> bool {
    true
}

fn polymesh() -> PrimitiveKind {
    PrimitiveKind::PolyMesh
}

type Library = HashMap<String, Arc<GeometryData>>;

impl Script {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Run every frame through a fresh session writing to memory.
    pub fn replay(&self) -> Result<(MemoryArchive, Diagnostics)> {
        let layers = self.layers.compile()?;
        let library: Library = self
            .geometry
            .iter()
            .map(|(name, data)| (name.clone(), Arc::new(data.clone())))
            .collect();

        let mut session = ExportSession::new(MemoryArchive::new(), self.options.clone());
        for (index, frame) in self.frames.iter().enumerate() {
            for (paths, locked) in [(&frame.lock, true), (&frame.unlock, false)] {
                for path in paths {
                    let id = session
                        .find(path)
                        .ok_or_else(|| Error::config(format!("cannot lock {path}: no such node")))?;
                    session.lock(id, locked)?;
                }
            }

            let sample = match frame.build(&library, &self.options) {
                Ok(sample) => sample,
                Err(e) => {
                    session.report_error(&e);
                    return Err(e);
                }
            };
            let stats = session.reconcile(&sample, index)?;
            session.save(&layers)?;
            debug!(frame = index, created = stats.created, "replayed frame");
        }

        info!(frames = self.frames.len(), "replay finished");
        Ok(session.finish())
    }
}

impl LayerRules {
    fn compile(&self) -> Result<LayerOptions> {
        let mut layers = LayerOptions::new();
        for r in &self.nodes {
            layers.add_node_rule(&r.pattern, r.layer)?;
        }
        for r in &self.viz {
            layers.add_viz_rule(&r.pattern, r.viz)?;
        }
        for r in &self.attrs {
            layers.add_attr_rule(&r.pattern, &r.names, r.layer)?;
        }
        for r in &self.user_props {
            layers.add_user_prop_rule(&r.pattern, &r.names, r.layer)?;
        }
        Ok(layers)
    }
}

impl Frame {
    fn build(&self, library: &Library, options: &ExportOptions) -> Result<SampleTree> {
        let mut tree = SampleTree::new();

        for op in &self.xforms {
            let m = match (op.matrix, op.translate) {
                (Some(cols), _) => matrix_from_cols(&cols),
                (None, Some(t)) => DMat4::from_translation(DVec3::from_array(t)),
                (None, None) => DMat4::IDENTITY,
            };
            let node = tree.ensure_xform(&op.path);
            node.set_xform(m);
            if !op.user_props.is_empty() {
                let mut props = UserProperties::new();
                for (name, value) in &op.user_props {
                    props.insert(name.clone(), value.clone());
                }
                node.set_user_props(props);
            }
        }

        for op in &self.shapes {
            let mut prim = Primitive::new(op.kind, lookup(library, &op.geometry)?);
            if let Some(t) = op.translate {
                prim = prim.with_transform(DMat4::from_translation(DVec3::from_array(t)));
            }
            let mut entry = ShapeEntry::new(prim).with_visible(op.visible);
            if let Some(group) = &op.subd_group {
                entry = entry.with_subd_group(group.clone());
            }
            tree.node_mut(&op.parent)
                .ok_or_else(|| Error::config(format!("Transform {} not found", op.parent)))?
                .append_shape(&op.name, entry);
        }

        for op in &self.packed {
            let prims = op
                .geometry
                .iter()
                .map(|g| Ok(Primitive::new(op.kind, lookup(library, g)?)))
                .collect::<Result<Vec<_>>>()?;
            let mut packed = PackedGeometry::new(op.source.clone(), prims)
                .with_visible(op.visible)
                .with_subd(op.subd);
            if let Some(group) = &op.subd_group {
                packed = packed.with_subd_group(group.clone());
            }
            if op.translate.is_empty() {
                tree.add_packed(&op.parent, &op.name, &packed, options)?;
            } else {
                let xforms: Vec<DMat4> = op
                    .translate
                    .iter()
                    .map(|t| DMat4::from_translation(DVec3::from_array(*t)))
                    .collect();
                tree.add_instances(&op.parent, &op.name, &packed, &xforms, options)?;
            }
        }

        for op in &self.cameras {
            tree.node_mut(&op.parent)
                .ok_or_else(|| Error::config(format!("Transform {} not found", op.parent)))?
                .set_camera(&op.name, op.camera.clone());
        }

        for op in &self.failures {
            tree.report_cook_failure(&op.path, &op.message);
        }
        Ok(tree)
    }
}

fn lookup(library: &Library, name: &str) -> Result<Arc<GeometryData>> {
    library
        .get(name)
        .cloned()
        .ok_or_else(|| Error::config(format!("unknown geometry {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"{
        "geometry": { "box": { "positions": [[0,0,0],[1,1,1]] } },
        "frames": [
            { "xforms": [{ "path": "/geo" }],
              "shapes": [{ "parent": "/geo", "name": "a", "geometry": "box" }] },
            { "xforms": [{ "path": "/geo", "translate": [0, 2, 0] }],
              "shapes": [{ "parent": "/geo", "name": "a", "geometry": "box" }] }
        ]
    }"#;

    #[test]
    fn test_replay_shares_geometry_between_frames() {
        let script: Script = serde_json::from_str(SCRIPT).unwrap();
        let (archive, diagnostics) = script.replay().unwrap();

        let shape = archive.find("/geo/a").unwrap();
        assert_eq!(archive.object(shape).unwrap().samples.len(), 2);
        assert_eq!(archive.value_writes(shape), 1);
        assert_eq!(archive.value_writes(archive.find("/geo").unwrap()), 2);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_unknown_geometry_is_configuration_error() {
        let script: Script = serde_json::from_str(
            r#"{ "frames": [{ "xforms": [{ "path": "/g" }],
                 "shapes": [{ "parent": "/g", "name": "a", "geometry": "nope" }] }] }"#,
        )
        .unwrap();
        assert!(matches!(script.replay(), Err(Error::Configuration(_))));
    }
}
