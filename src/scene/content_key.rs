//! Content keys for instance deduplication.
//!
//! Two packed references get the same key exactly when they would refine
//! to byte-identical geometry: same source kind, same source identity and,
//! for nested archives, the same object path, frame and attribute filters.
//! Every discriminating field is fed length-prefixed into a BLAKE3 hasher,
//! so adjacent strings can never run together into the same byte stream.

use std::fmt;

use serde::Deserialize;

/// A 32-byte BLAKE3 digest identifying shared geometry.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ContentKey(pub [u8; 32]);

impl ContentKey {
    /// View the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Anything able to report the fields that discriminate its geometry.
pub trait ContentKeySource {
    /// Feed every discriminating field to `hasher`.
    fn write_key(&self, hasher: &mut KeyHasher);

    /// Compute the content key. `subd` marks polygons exported as subdivision surfaces.
    fn content_key(&self, subd: bool) -> ContentKey {
        let mut hasher = KeyHasher::new();
        hasher.flag(subd);
        self.write_key(&mut hasher);
        hasher.finish()
    }
}

/// Length-prefixed field hasher.
pub struct KeyHasher(blake3::Hasher);

impl KeyHasher {
    fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn tag(&mut self, tag: &str) -> &mut Self {
        self.str(tag)
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.0.update(&(s.len() as u64).to_le_bytes());
        self.0.update(s.as_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.update(&v.to_le_bytes());
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.u64(v.to_bits())
    }

    pub fn flag(&mut self, v: bool) -> &mut Self {
        self.0.update(&[u8::from(v)]);
        self
    }

    pub fn strs(&mut self, values: &[String]) -> &mut Self {
        self.u64(values.len() as u64);
        for v in values {
            self.str(v);
        }
        self
    }

    fn finish(&self) -> ContentKey {
        ContentKey(*self.0.finalize().as_bytes())
    }
}

/// Attribute and group selection applied when reading a nested archive.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArchiveFilters {
    pub point: String,
    pub vertex: String,
    pub primitive: String,
    pub detail: String,
    pub face_set: String,
}

/// Where the geometry of a packed primitive comes from.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometrySource {
    /// Geometry embedded in the scene, identified by its blob id.
    Inline { geometry_id: u64 },
    /// A named piece of an embedded geometry blob.
    Fragment {
        geometry_id: u64,
        attribute: String,
        name: String,
    },
    /// A single file on disk.
    Disk { path: String },
    /// A sequence of files blended at `index`.
    DiskSequence {
        files: Vec<String>,
        index: f64,
        #[serde(default)]
        wrap: u8,
    },
    /// An object inside another archive.
    Archive {
        files: Vec<String>,
        object_path: String,
        frame: f64,
        #[serde(default)]
        filters: ArchiveFilters,
    },
}

impl ContentKeySource for GeometrySource {
    fn write_key(&self, h: &mut KeyHasher) {
        match self {
            Self::Inline { geometry_id } => {
                h.tag("g").u64(*geometry_id);
            }
            Self::Fragment {
                geometry_id,
                attribute,
                name,
            } => {
                h.tag("f").u64(*geometry_id).str(attribute).str(name);
            }
            Self::Disk { path } => {
                h.tag("d").str(path);
            }
            Self::DiskSequence { files, index, wrap } => {
                h.tag("ds").u64(u64::from(*wrap)).f64(*index).strs(files);
            }
            Self::Archive {
                files,
                object_path,
                frame,
                filters,
            } => {
                h.tag("a")
                    .strs(files)
                    .str(object_path)
                    .f64(*frame)
                    .str(&filters.point)
                    .str(&filters.vertex)
                    .str(&filters.primitive)
                    .str(&filters.detail)
                    .str(&filters.face_set);
            }
        }
    }
}
