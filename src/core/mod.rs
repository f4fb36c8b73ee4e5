//! Core value types shared by the writer and the exporter.
//!
//! - [`MetaData`] - Key/value metadata on container objects
//! - [`ObjectVisibility`] - Per-sample visibility state

mod metadata;
mod visibility;

pub use metadata::*;
pub use visibility::*;
