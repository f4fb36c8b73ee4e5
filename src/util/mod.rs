//! Utility types and functions for the exporter.
//!
//! This module contains fundamental types used throughout the library:
//! - [`Error`] / [`Result`] - Error handling
//! - [`BBox3d`] and math type re-exports from glam

mod error;
mod math;

pub use error::*;
pub use math::*;
