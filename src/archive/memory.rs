//! In-memory container writer.
//!
//! Records the object hierarchy and an append-only sample log per object.
//! From-previous samples are stored as markers and resolved on read by
//! walking back to the last written value.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::trace;

use super::{bounds_array, ContainerWriter, ObjectHandle, ObjectKind, Sample, SampleValue, ValueWrite};
use crate::core::{MetaData, ObjectVisibility};
use crate::util::{BBox3d, Error, Result};

/// What a recorded object is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordedKind {
    Root,
    Object(ObjectKind),
    /// Instance of another object.
    Instance(ObjectHandle),
}

/// One object in a [`MemoryArchive`].
#[derive(Clone, Debug, Serialize)]
pub struct RecordedObject {
    pub name: String,
    pub path: String,
    pub kind: RecordedKind,
    #[serde(serialize_with = "serialize_meta")]
    pub meta: MetaData,
    pub sparse: bool,
    #[serde(skip)]
    pub parent: Option<ObjectHandle>,
    #[serde(skip)]
    pub children: Vec<ObjectHandle>,
    pub samples: Vec<Sample>,
}

/// Container writer that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    objects: Vec<RecordedObject>,
    by_path: HashMap<String, ObjectHandle>,
    archive_bounds: Vec<BBox3d>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        let root = RecordedObject {
            name: String::new(),
            path: "/".to_string(),
            kind: RecordedKind::Root,
            meta: MetaData::new(),
            sparse: false,
            parent: None,
            children: Vec::new(),
            samples: Vec::new(),
        };
        let mut by_path = HashMap::new();
        by_path.insert("/".to_string(), ObjectHandle(0));
        Self {
            objects: vec![root],
            by_path,
            archive_bounds: Vec::new(),
        }
    }

    /// Number of objects, root included.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.len() <= 1
    }

    pub fn object(&self, handle: ObjectHandle) -> Option<&RecordedObject> {
        self.objects.get(handle.0)
    }

    /// Object at a full path such as `/geo/rock`.
    pub fn find(&self, path: &str) -> Option<ObjectHandle> {
        self.by_path.get(path).copied()
    }

    /// Child names of `handle`, in creation order.
    pub fn child_names(&self, handle: ObjectHandle) -> Vec<&str> {
        self.object(handle)
            .map(|o| {
                o.children
                    .iter()
                    .filter_map(|c| self.object(*c))
                    .map(|c| c.name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Visibility of every sample written to the object at `path`.
    pub fn visibilities(&self, path: &str) -> Vec<Option<ObjectVisibility>> {
        self.find(path)
            .and_then(|h| self.object(h))
            .map(|o| o.samples.iter().map(|s| s.visibility).collect())
            .unwrap_or_default()
    }

    /// Value in effect at sample `index`, following from-previous markers.
    pub fn resolved_value(&self, handle: ObjectHandle, index: usize) -> Option<&SampleValue> {
        let object = self.object(handle)?;
        if let RecordedKind::Instance(source) = object.kind {
            return self.resolved_value(source, index);
        }
        object.samples.get(..=index)?.iter().rev().find_map(|s| match &s.value {
            ValueWrite::Set(v) => Some(v),
            _ => None,
        })
    }

    /// Number of samples carrying a fresh value.
    pub fn value_writes(&self, handle: ObjectHandle) -> usize {
        self.object(handle)
            .map(|o| {
                o.samples
                    .iter()
                    .filter(|s| matches!(s.value, ValueWrite::Set(_)))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Archive bounds recorded per frame.
    pub fn archive_bounds(&self) -> &[BBox3d] {
        &self.archive_bounds
    }

    /// Objects of the given kind, in creation order.
    pub fn objects_of_kind(&self, kind: RecordedKind) -> impl Iterator<Item = &RecordedObject> {
        self.objects.iter().filter(move |o| o.kind == kind)
    }

    /// Number of instance objects.
    pub fn instance_count(&self) -> usize {
        self.objects
            .iter()
            .filter(|o| matches!(o.kind, RecordedKind::Instance(_)))
            .count()
    }

    /// JSON dump of the whole archive.
    pub fn to_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Dump<'a> {
            objects: &'a [RecordedObject],
            archive_bounds: Vec<[[f64; 3]; 2]>,
        }
        let dump = Dump {
            objects: &self.objects,
            archive_bounds: self.archive_bounds.iter().copied().map(bounds_array).collect(),
        };
        Ok(serde_json::to_string_pretty(&dump)?)
    }

    /// Write the JSON dump to `path`.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut RecordedObject> {
        self.objects
            .get_mut(handle.0)
            .ok_or_else(|| Error::container(format!("no object {}", handle.0)))
    }

    fn add(&mut self, parent: ObjectHandle, name: &str, kind: RecordedKind, meta: &MetaData, sparse: bool) -> Result<ObjectHandle> {
        let parent_obj = self
            .object(parent)
            .ok_or_else(|| Error::container(format!("no parent object {}", parent.0)))?;
        if matches!(parent_obj.kind, RecordedKind::Instance(_)) {
            return Err(Error::container(format!("{} is an instance", parent_obj.path)));
        }
        let path = if parent_obj.path == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", parent_obj.path)
        };
        if self.by_path.contains_key(&path) {
            return Err(Error::container(format!("duplicate object {path}")));
        }

        let handle = ObjectHandle(self.objects.len());
        self.objects.push(RecordedObject {
            name: name.to_string(),
            path: path.clone(),
            kind,
            meta: meta.clone(),
            sparse,
            parent: Some(parent),
            children: Vec::new(),
            samples: Vec::new(),
        });
        self.get_mut(parent)?.children.push(handle);
        trace!(%path, ?kind, "created object");
        self.by_path.insert(path, handle);
        Ok(handle)
    }
}

impl ContainerWriter for MemoryArchive {
    fn root(&self) -> ObjectHandle {
        ObjectHandle(0)
    }

    fn create_object(
        &mut self,
        parent: ObjectHandle,
        name: &str,
        kind: ObjectKind,
        meta: &MetaData,
        sparse: bool,
    ) -> Result<ObjectHandle> {
        self.add(parent, name, RecordedKind::Object(kind), meta, sparse)
    }

    fn create_instance(&mut self, parent: ObjectHandle, name: &str, source: ObjectHandle) -> Result<ObjectHandle> {
        match self.object(source).map(|o| o.kind) {
            Some(RecordedKind::Object(_)) => {}
            _ => return Err(Error::container(format!("invalid instance source {}", source.0))),
        }
        self.add(parent, name, RecordedKind::Instance(source), &MetaData::new(), false)
    }

    fn write_sample(&mut self, object: ObjectHandle, sample: Sample) -> Result<()> {
        let obj = self.get_mut(object)?;
        match obj.kind {
            RecordedKind::Object(_) => {}
            _ => return Err(Error::container(format!("cannot write samples to {}", obj.path))),
        }
        if obj.samples.is_empty() && matches!(sample.value, ValueWrite::FromPrevious) {
            return Err(Error::container(format!("{}: first sample repeats nothing", obj.path)));
        }
        obj.samples.push(sample);
        Ok(())
    }

    fn sample_count(&self, object: ObjectHandle) -> usize {
        self.object(object).map(|o| o.samples.len()).unwrap_or(0)
    }

    fn set_archive_bounds(&mut self, bounds: BBox3d) -> Result<()> {
        self.archive_bounds.push(bounds);
        Ok(())
    }
}

fn serialize_meta<S: serde::Serializer>(meta: &MetaData, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&meta.serialize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::DMat4;

    #[test]
    fn test_hierarchy_and_paths() {
        let mut archive = MemoryArchive::new();
        let root = archive.root();
        let geo = archive
            .create_object(root, "geo", ObjectKind::Xform, &MetaData::new(), false)
            .unwrap();
        let rock = archive
            .create_object(geo, "rock", ObjectKind::PolyMesh, &MetaData::new(), false)
            .unwrap();

        assert_eq!(archive.find("/geo/rock"), Some(rock));
        assert_eq!(archive.child_names(root), ["geo"]);
        assert!(archive
            .create_object(geo, "rock", ObjectKind::PolyMesh, &MetaData::new(), false)
            .is_err());
    }

    #[test]
    fn test_from_previous_resolves_backwards() {
        let mut archive = MemoryArchive::new();
        let root = archive.root();
        let x = archive
            .create_object(root, "x", ObjectKind::Xform, &MetaData::new(), false)
            .unwrap();

        assert!(archive.write_from_previous(x, None).is_err());

        let m = DMat4::from_scale(crate::util::DVec3::splat(2.0));
        archive
            .write_sample(x, Sample::new(ValueWrite::Set(SampleValue::Xform(m))))
            .unwrap();
        archive.write_from_previous(x, Some(ObjectVisibility::Hidden)).unwrap();

        assert_eq!(archive.sample_count(x), 2);
        assert_eq!(archive.value_writes(x), 1);
        match archive.resolved_value(x, 1) {
            Some(SampleValue::Xform(v)) => assert_eq!(*v, m),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(archive.visibilities("/x"), [None, Some(ObjectVisibility::Hidden)]);
    }

    #[test]
    fn test_instances_resolve_to_source() {
        let mut archive = MemoryArchive::new();
        let root = archive.root();
        let src = archive
            .create_object(root, "src", ObjectKind::Points, &MetaData::new(), false)
            .unwrap();
        let inst = archive.create_instance(root, "ref", src).unwrap();
        assert!(archive.write_from_previous(inst, None).is_err());
        assert!(archive.create_instance(root, "bad", inst).is_err());
        assert_eq!(archive.instance_count(), 1);
        assert!(archive.resolved_value(inst, 0).is_none());
    }

    #[test]
    fn test_save_json() {
        let mut archive = MemoryArchive::new();
        let root = archive.root();
        let meta = MetaData::new().with(MetaData::PRUNE_KEY, "1");
        archive
            .create_object(root, "gone", ObjectKind::Xform, &meta, true)
            .unwrap();
        archive.set_archive_bounds(BBox3d::EMPTY).unwrap();

        let file = tempfile::NamedTempFile::new().expect("temp file");
        archive.save_json(file.path()).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["objects"][1]["path"], "/gone");
        assert_eq!(value["objects"][1]["meta"], "prune=1");
        assert_eq!(value["objects"][1]["sparse"], true);
    }
}
