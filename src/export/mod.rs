//! Persistent export tree and per-frame reconciliation.
//!
//! An [`ExportSession`] owns a [`NodeTree`] that outlives every frame. Each
//! frame the caller builds a fresh [`SampleTree`](crate::scene::SampleTree),
//! reconciles it into the persistent tree, and saves. Saving resolves layer
//! dispositions, binds new nodes to container objects and appends exactly
//! one sample per frame to every bound object, backfilling hidden samples
//! for nodes that appeared late.

mod diagnostics;
mod instance;
mod layer;
mod merge;
mod names;
mod node;
mod options;
mod session;
mod tree;
mod write;


pub use diagnostics::Diagnostics;
pub use instance::{InstanceId, InstanceKey, InstanceRegistry};
pub use layer::{LayerAssignment, LayerOptions, LayerType, Pattern, VizType};
pub use merge::MergeStats;
pub use names::CollisionResolver;
pub use node::{Binding, CameraNode, InstanceNode, Node, NodeId, NodeKind, ShapeNode, Slots, XformNode};
pub use options::ExportOptions;
pub use session::ExportSession;
pub use tree::NodeTree;
