//! Layered export tests: node dispositions, metadata markers and scoped rules.

use std::sync::Arc;

use alembic_export::archive::{PropertyValue, RecordedObject};
use alembic_export::prelude::*;

fn scene() -> SampleTree {
    let data = Arc::new(
        GeometryData::from_points(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]])
            .with_attribute("N", vec![0.0, 1.0, 0.0])
            .with_attribute("Cd", vec![1.0, 0.0, 0.0]),
    );
    let mut props = UserProperties::new();
    props.insert("shot", serde_json::json!("sq010"));
    props.insert("take", serde_json::json!(3));

    let mut sample = SampleTree::new();
    sample
        .ensure_xform("/geo/rock")
        .set_user_props(props)
        .append_shape("mesh", ShapeEntry::new(Primitive::new(PrimitiveKind::PolyMesh, data)));
    sample.ensure_xform("/other");
    sample
}

fn export(layers: &LayerOptions, options: ExportOptions, frames: usize) -> MemoryArchive {
    let sample = scene();
    let mut session = ExportSession::new(MemoryArchive::new(), options);
    for frame in 0..frames {
        session.reconcile(&sample, frame).unwrap();
        session.save(layers).unwrap();
    }
    session.finish().0
}

fn object<'a>(archive: &'a MemoryArchive, path: &str) -> &'a RecordedObject {
    archive
        .find(path)
        .and_then(|h| archive.object(h))
        .unwrap_or_else(|| panic!("no object at {path}"))
}

#[test]
fn test_prune_suppresses_replace_below() {
    let mut layers = LayerOptions::new();
    layers.add_node_rule("/geo/rock", LayerType::Replace).unwrap();
    layers.add_node_rule("/geo", LayerType::Prune).unwrap();
    let archive = export(&layers, ExportOptions::default(), 2);

    for path in ["/geo", "/geo/rock", "/geo/rock/mesh"] {
        let obj = object(&archive, path);
        assert!(obj.meta.is_pruned(), "{path}");
        assert!(!obj.meta.is_replaced(), "{path}");
        assert!(obj.sparse, "{path}");
        assert!(obj.samples.is_empty(), "{path}");
    }
    assert!(archive.find("/other").is_none());
}

#[test]
fn test_replace_marks_whole_subtree() {
    let mut layers = LayerOptions::new();
    layers.add_node_rule("/geo", LayerType::Replace).unwrap();
    let archive = export(&layers, ExportOptions::default(), 1);

    for path in ["/geo", "/geo/rock", "/geo/rock/mesh"] {
        let obj = object(&archive, path);
        assert!(obj.meta.is_replaced(), "{path}");
        assert!(!obj.sparse, "{path}");
        assert_eq!(obj.samples.len(), 1, "{path}");
    }
}

#[test]
fn test_ancestors_of_full_nodes_are_sparse() {
    let mut layers = LayerOptions::new();
    layers.add_node_rule("/geo/rock/mesh", LayerType::Full).unwrap();
    let archive = export(&layers, ExportOptions::default(), 2);

    for path in ["/geo", "/geo/rock"] {
        let obj = object(&archive, path);
        assert!(obj.sparse, "{path}");
        assert_eq!(obj.samples.len(), 2, "{path}");
        assert!(obj.samples.iter().all(|s| matches!(s.value, ValueWrite::Skip)));
        assert!(obj.samples.iter().all(|s| s.visibility.is_none()));
    }
    let mesh = object(&archive, "/geo/rock/mesh");
    assert!(!mesh.sparse);
    assert!(matches!(mesh.samples[0].value, ValueWrite::Set(_)));
    assert!(archive.find("/other").is_none());
}

#[test]
fn test_full_ancestors_option() {
    let mut layers = LayerOptions::new();
    layers.add_node_rule("/geo/rock/mesh", LayerType::Full).unwrap();
    let archive = export(&layers, ExportOptions::default().with_full_ancestors(true), 1);

    let geo = object(&archive, "/geo");
    assert!(!geo.sparse);
    assert!(matches!(geo.samples[0].value, ValueWrite::Set(SampleValue::Xform(_))));
}

#[test]
fn test_visibility_rule_forces_state() {
    let mut layers = LayerOptions::new();
    layers.add_viz_rule("/geo/rock", VizType::Hidden).unwrap();
    layers.add_viz_rule("/other", VizType::None).unwrap();
    let archive = export(&layers, ExportOptions::default(), 2);

    let hidden = Some(ObjectVisibility::Hidden);
    assert_eq!(archive.visibilities("/geo/rock"), [hidden, hidden]);
    assert_eq!(archive.visibilities("/other"), [None, None]);
    assert_eq!(
        archive.visibilities("/geo"),
        [Some(ObjectVisibility::Deferred), Some(ObjectVisibility::Deferred)]
    );
}

#[test]
fn test_attribute_rules_filter_shape_samples() {
    let mut layers = LayerOptions::new();
    layers.add_attr_rule("/geo/*", "Cd", LayerType::Prune).unwrap();
    let archive = export(&layers, ExportOptions::default(), 1);

    let mesh = object(&archive, "/geo/rock/mesh");
    let ValueWrite::Set(SampleValue::Shape(shape)) = &mesh.samples[0].value else {
        panic!("expected a shape value");
    };
    assert_eq!(shape.attributes, ["N"]);
    assert_eq!(shape.pruned_attributes, ["Cd"]);
}

#[test]
fn test_user_property_rules() {
    let mut layers = LayerOptions::new();
    layers.add_user_prop_rule("/geo/rock", "take", LayerType::Prune).unwrap();
    let archive = export(&layers, ExportOptions::default(), 2);

    let rock = object(&archive, "/geo/rock");
    assert_eq!(
        rock.samples[0].user_properties,
        [
            ("shot".to_string(), PropertyValue::Value(serde_json::json!("sq010"))),
            ("take".to_string(), PropertyValue::Pruned),
        ]
    );
    // Written again on the next frame even though the transform repeats.
    assert!(matches!(rock.samples[1].value, ValueWrite::FromPrevious));
    assert_eq!(rock.samples[1].user_properties.len(), 2);
}

#[test]
fn test_invalid_pattern_is_configuration_error() {
    let mut layers = LayerOptions::new();
    assert!(matches!(
        layers.add_node_rule("   ", LayerType::Full),
        Err(Error::Configuration(_))
    ));
}
