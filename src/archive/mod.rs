//! Container writer interface.
//!
//! The exporter never encodes samples itself. It talks to a
//! [`ContainerWriter`], which creates objects in a time-sampled hierarchy
//! and appends one [`Sample`] per object per frame. A sample's value can be
//! a fresh value, a from-previous marker (O(1) regardless of payload size)
//! or absent for sparse objects that only override visibility.
//!
//! [`MemoryArchive`] is the in-crate implementation, used by the CLI and the
//! tests to inspect exactly what was written.

mod memory;

pub use memory::*;

use serde::Serialize;

use crate::core::{MetaData, ObjectVisibility};
use crate::scene::{CameraSample, GeometryData, PrimitiveKind};
use crate::util::{BBox3d, DMat4, Result};
use std::sync::Arc;

/// Opaque handle to an object created by a container writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectHandle(pub usize);

/// Schema of a container object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Xform,
    PolyMesh,
    SubD,
    Curves,
    Points,
    NuPatch,
    Camera,
}

impl From<PrimitiveKind> for ObjectKind {
    fn from(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::PolyMesh => Self::PolyMesh,
            PrimitiveKind::SubD => Self::SubD,
            PrimitiveKind::Curves => Self::Curves,
            PrimitiveKind::Points => Self::Points,
            PrimitiveKind::NuPatch => Self::NuPatch,
        }
    }
}

/// Geometry value of a shape sample.
#[derive(Clone, Debug, Serialize)]
pub struct ShapeSample {
    #[serde(skip)]
    pub geometry: Arc<GeometryData>,
    #[serde(serialize_with = "serialize_matrix")]
    pub transform: DMat4,
    pub bounds: [[f64; 3]; 2],
    /// Attributes written with the sample.
    pub attributes: Vec<String>,
    /// Attributes explicitly pruned by a layer rule.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pruned_attributes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subd_group: Option<String>,
}

/// Typed value written for an object.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleValue {
    Xform(#[serde(serialize_with = "serialize_matrix")] DMat4),
    Shape(ShapeSample),
    Camera(CameraSample),
}

/// How the value slot of a sample is filled.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueWrite {
    /// A new value.
    Set(SampleValue),
    /// Repeat the previous value.
    FromPrevious,
    /// No value (sparse overrides only carry visibility).
    Skip,
}

/// A user property as written.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyValue {
    Value(serde_json::Value),
    Pruned,
}

/// One frame's sample for one object.
#[derive(Clone, Debug, Serialize)]
pub struct Sample {
    pub value: ValueWrite,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<ObjectVisibility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_bounds: Option<[[f64; 3]; 2]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_properties: Vec<(String, PropertyValue)>,
}

impl Sample {
    pub fn new(value: ValueWrite) -> Self {
        Self {
            value,
            visibility: None,
            child_bounds: None,
            user_properties: Vec::new(),
        }
    }

    /// Repeat the previous value with the given visibility.
    pub fn from_previous(visibility: Option<ObjectVisibility>) -> Self {
        Self::new(ValueWrite::FromPrevious).with_visibility(visibility)
    }

    pub fn with_visibility(mut self, visibility: Option<ObjectVisibility>) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_child_bounds(mut self, bounds: Option<BBox3d>) -> Self {
        self.child_bounds = bounds.map(bounds_array);
        self
    }
}

/// Writer for a time-sampled object hierarchy.
///
/// Calls arrive synchronously in frame order; implementations need not be
/// re-entrant.
pub trait ContainerWriter {
    /// The root object.
    fn root(&self) -> ObjectHandle;

    /// Create an object named `name` under `parent`.
    fn create_object(
        &mut self,
        parent: ObjectHandle,
        name: &str,
        kind: ObjectKind,
        meta: &MetaData,
        sparse: bool,
    ) -> Result<ObjectHandle>;

    /// Create an instance object under `parent` referencing `source`.
    fn create_instance(&mut self, parent: ObjectHandle, name: &str, source: ObjectHandle) -> Result<ObjectHandle>;

    /// Append a sample to `object`.
    fn write_sample(&mut self, object: ObjectHandle, sample: Sample) -> Result<()>;

    /// Append a from-previous sample to `object`.
    fn write_from_previous(&mut self, object: ObjectHandle, visibility: Option<ObjectVisibility>) -> Result<()> {
        self.write_sample(object, Sample::from_previous(visibility))
    }

    /// Number of samples appended to `object`.
    fn sample_count(&self, object: ObjectHandle) -> usize;

    /// Record the archive-level bounds for the current frame.
    fn set_archive_bounds(&mut self, bounds: BBox3d) -> Result<()>;
}

pub(crate) fn bounds_array(b: BBox3d) -> [[f64; 3]; 2] {
    [b.min.to_array(), b.max.to_array()]
}

fn serialize_matrix<S: serde::Serializer>(m: &DMat4, s: S) -> std::result::Result<S::Ok, S::Error> {
    m.to_cols_array().serialize(s)
}
