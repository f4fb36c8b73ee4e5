//! # Alembic export
//!
//! Frame-by-frame export of an evolving scene into a time-sampled object
//! hierarchy such as an Alembic archive.
//!
//! Every frame the caller describes the scene as a fresh, identity-free
//! [`SampleTree`](scene::SampleTree). An [`ExportSession`](export::ExportSession)
//! reconciles it against the persistent node tree built up over previous
//! frames, so objects keep stable names and ordering, deduplicates packed
//! geometry into instances, hides objects that disappear and backfills
//! hidden samples for objects that appear late. Saving applies layer
//! overrides and streams one sample per object to a
//! [`ContainerWriter`](archive::ContainerWriter).
//!
//! ## Modules
//!
//! - [`util`] - Errors, bounding boxes, matrix helpers
//! - [`core`] - Object metadata and visibility
//! - [`archive`] - Container writer interface and the in-memory archive
//! - [`scene`] - Per-frame sample tree, primitives, content keys
//! - [`export`] - Persistent tree, reconciliation, layering, sample writing
//!
//! ## Example
//!
//! ```ignore
//! use alembic_export::prelude::*;
//!
//! let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
//! for frame in 0..24 {
//!     let mut sample = SampleTree::new();
//!     sample.ensure_xform("/geo").append_shape("rock", ShapeEntry::new(rock_at(frame)));
//!     session.reconcile(&sample, frame)?;
//!     session.save(&LayerOptions::new())?;
//! }
//! let (archive, diagnostics) = session.finish();
//! ```

pub mod archive;
pub mod core;
pub mod export;
pub mod scene;
pub mod util;

// Re-export commonly used types
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::archive::{ContainerWriter, MemoryArchive, ObjectHandle, Sample, SampleValue, ValueWrite};
    pub use crate::core::{MetaData, ObjectVisibility};
    pub use crate::export::{
        Diagnostics, ExportOptions, ExportSession, LayerOptions, LayerType, NodeId, NodeKind, VizType,
    };
    pub use crate::scene::{
        CameraSample, GeometryData, GeometrySource, PackedGeometry, PackedTransform, Primitive, PrimitiveKind,
        SampleTree, ShapeEntry, UserProperties,
    };
    pub use crate::util::{BBox3d, DMat4, DVec3, Error, Result};
}
