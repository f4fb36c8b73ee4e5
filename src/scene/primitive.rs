//! Refined geometry handed to the exporter.
//!
//! A [`Primitive`] is a cheap handle: the point/topology payload lives
//! behind an `Arc`, so cloning a primitive or carrying it across frames never
//! copies geometry. Two handles that share the same payload and transform
//! are the same sample, which lets the writer emit a from-previous marker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::util::{same_matrix, BBox3d, DMat4, DVec3};

/// Geometry kinds a shape node can hold.
///
/// Shapes are grouped per (name, kind) during reconciliation, so the order
/// of this enum is the order kinds are visited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    PolyMesh,
    SubD,
    Curves,
    Points,
    NuPatch,
}

/// Named per-element attribute.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<f64>,
}

/// Point positions, topology and attributes of one primitive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryData {
    #[serde(default)]
    pub positions: Vec<[f64; 3]>,
    #[serde(default)]
    pub counts: Vec<u32>,
    #[serde(default)]
    pub indices: Vec<u32>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl GeometryData {
    /// Geometry from positions only.
    pub fn from_points(positions: Vec<[f64; 3]>) -> Self {
        Self {
            positions,
            ..Self::default()
        }
    }

    /// Add a named attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            values,
        });
        self
    }
}

/// A refined primitive: kind, shared payload and the transform applied to it.
#[derive(Clone, Debug)]
pub struct Primitive {
    kind: PrimitiveKind,
    data: Arc<GeometryData>,
    transform: DMat4,
}

impl Primitive {
    pub fn new(kind: PrimitiveKind, data: Arc<GeometryData>) -> Self {
        Self {
            kind,
            data,
            transform: DMat4::IDENTITY,
        }
    }

    /// Replace the primitive transform.
    pub fn with_transform(mut self, transform: DMat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    pub fn data(&self) -> &Arc<GeometryData> {
        &self.data
    }

    pub fn transform(&self) -> &DMat4 {
        &self.transform
    }

    /// Fold an outer transform into the deformation.
    pub fn folded(&self, outer: &DMat4) -> Self {
        Self {
            kind: self.kind,
            data: Arc::clone(&self.data),
            transform: *outer * self.transform,
        }
    }

    /// Reinterpret the primitive as another kind (polygons written as subdivision surfaces).
    pub fn as_kind(&self, kind: PrimitiveKind) -> Self {
        Self {
            kind,
            data: Arc::clone(&self.data),
            transform: self.transform,
        }
    }

    /// Deep copy that no longer shares its payload with the upstream cook.
    pub fn harden(&self) -> Self {
        Self {
            kind: self.kind,
            data: Arc::new(GeometryData::clone(&self.data)),
            transform: self.transform,
        }
    }

    /// True if both handles denote the same written sample.
    pub fn is_same(&self, other: &Primitive) -> bool {
        self.kind == other.kind
            && Arc::ptr_eq(&self.data, &other.data)
            && same_matrix(&self.transform, &other.transform)
    }

    /// Bounds of the transformed points.
    pub fn bounds(&self) -> BBox3d {
        let mut b = BBox3d::EMPTY;
        for p in &self.data.positions {
            b.expand_by_point(self.transform.transform_point3(DVec3::from_array(*p)));
        }
        b
    }

    /// Names of the attributes carried by the payload.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.data.attributes.iter().map(|a| a.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_points() -> Arc<GeometryData> {
        Arc::new(GeometryData::from_points(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]))
    }

    #[test]
    fn test_bounds_follow_transform() {
        let prim = Primitive::new(PrimitiveKind::Points, unit_points())
            .with_transform(DMat4::from_translation(DVec3::new(0.0, 5.0, 0.0)));
        let b = prim.bounds();
        assert_eq!(b.min, DVec3::new(0.0, 5.0, 0.0));
        assert_eq!(b.max, DVec3::new(1.0, 6.0, 1.0));
    }

    #[test]
    fn test_same_and_harden() {
        let prim = Primitive::new(PrimitiveKind::PolyMesh, unit_points());
        let copy = prim.clone();
        assert!(prim.is_same(&copy));

        let hard = prim.harden();
        assert!(!prim.is_same(&hard));
        assert_eq!(*hard.data(), *prim.data());

        let moved = prim.folded(&DMat4::from_scale(DVec3::splat(2.0)));
        assert!(!prim.is_same(&moved));
        assert_eq!(moved.bounds().max, DVec3::splat(2.0));
    }
}
