//! Per-frame scene description consumed by the exporter.
//!
//! - [`Primitive`] - Refined geometry handle
//! - [`CameraSample`] - Camera parameters
//! - [`UserProperties`] - User property payloads
//! - [`GeometrySource`] / [`ContentKey`] - Instance identity
//! - [`SampleTree`] - The frame's proposed hierarchy

mod camera;
mod content_key;
mod primitive;
mod sample_tree;
mod user_props;

pub use camera::*;
pub use content_key::*;
pub use primitive::*;
pub use sample_tree::*;
pub use user_props::*;
