//! Export configuration.

use serde::Deserialize;

use crate::scene::PackedTransform;

/// Options fixed for the lifetime of an export session.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Write per-transform child bounds.
    pub full_bounds: bool,
    /// Placement of packed primitive transforms.
    pub packed_transform: PackedTransform,
    /// Share geometry between packed primitives with the same content key.
    pub use_instancing: bool,
    /// Promote ancestors of fully emitted layer nodes to full instead of sparse.
    pub full_ancestors: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            full_bounds: false,
            packed_transform: PackedTransform::default(),
            use_instancing: true,
            full_ancestors: false,
        }
    }
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_full_bounds(mut self, full_bounds: bool) -> Self {
        self.full_bounds = full_bounds;
        self
    }

    pub fn with_packed_transform(mut self, packed_transform: PackedTransform) -> Self {
        self.packed_transform = packed_transform;
        self
    }

    pub fn with_instancing(mut self, use_instancing: bool) -> Self {
        self.use_instancing = use_instancing;
        self
    }

    pub fn with_full_ancestors(mut self, full_ancestors: bool) -> Self {
        self.full_ancestors = full_ancestors;
        self
    }
}
