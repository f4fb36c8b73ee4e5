//! End-to-end export session tests against the in-memory archive.

use std::sync::Arc;

use alembic_export::archive::{ObjectHandle, RecordedKind};
use alembic_export::prelude::*;

fn cube() -> Arc<GeometryData> {
    Arc::new(GeometryData::from_points(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]))
}

fn mesh(data: &Arc<GeometryData>) -> Primitive {
    Primitive::new(PrimitiveKind::PolyMesh, Arc::clone(data))
}

fn shapes_frame(data: &Arc<GeometryData>, names: &[&str]) -> SampleTree {
    let mut sample = SampleTree::new();
    for name in names {
        sample.root_mut().append_shape(name, ShapeEntry::new(mesh(data)));
    }
    sample
}

fn run(session: &mut ExportSession<MemoryArchive>, sample: &SampleTree) {
    let frame = session.frame();
    session.reconcile(sample, frame).unwrap();
    session.save(&LayerOptions::new()).unwrap();
}

fn assert_lockstep(archive: &MemoryArchive, frames: usize) {
    for i in 0..archive.len() {
        let obj = archive.object(ObjectHandle(i)).unwrap();
        if matches!(obj.kind, RecordedKind::Object(_)) {
            assert_eq!(obj.samples.len(), frames, "{}", obj.path);
        }
    }
}

const SHOWN: Option<ObjectVisibility> = Some(ObjectVisibility::Deferred);
const HIDDEN: Option<ObjectVisibility> = Some(ObjectVisibility::Hidden);

#[test]
fn test_three_frame_scenario() {
    let data = cube();
    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
    run(&mut session, &shapes_frame(&data, &["a", "b"]));
    run(&mut session, &shapes_frame(&data, &["a", "c"]));
    run(&mut session, &shapes_frame(&data, &["a", "b", "c"]));

    let (archive, diagnostics) = session.finish();
    assert_eq!(archive.visibilities("/a"), [SHOWN, SHOWN, SHOWN]);
    assert_eq!(archive.visibilities("/b"), [SHOWN, HIDDEN, SHOWN]);
    assert_eq!(archive.visibilities("/c"), [HIDDEN, SHOWN, SHOWN]);
    assert_eq!(archive.child_names(archive.root()), ["a", "b", "c"]);
    assert_lockstep(&archive, 3);
    assert!(diagnostics.is_empty());

    // Unchanged geometry is only written once.
    assert_eq!(archive.value_writes(archive.find("/a").unwrap()), 1);
}

#[test]
fn test_late_node_is_backfilled() {
    let data = cube();
    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
    for frame in 0..10 {
        let names: &[&str] = if frame < 4 { &["a"] } else { &["a", "late"] };
        run(&mut session, &shapes_frame(&data, names));
    }

    let (archive, _) = session.finish();
    let vis = archive.visibilities("/late");
    assert_eq!(vis.len(), 10);
    assert!(vis[..4].iter().all(|v| *v == HIDDEN));
    assert!(vis[4..].iter().all(|v| *v == SHOWN));

    let late = archive.object(archive.find("/late").unwrap()).unwrap();
    assert!(matches!(late.samples[0].value, ValueWrite::Set(_)));
    assert!(late.samples[1..].iter().all(|s| matches!(s.value, ValueWrite::FromPrevious)));
    assert_lockstep(&archive, 10);
}

#[test]
fn test_reconcile_twice_creates_nothing_new() {
    let data = cube();
    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
    let sample = shapes_frame(&data, &["a", "b"]);

    let first = session.reconcile(&sample, 0).unwrap();
    let second = session.reconcile(&sample, 0).unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(second.created, 0);

    session.save(&LayerOptions::new()).unwrap();
    assert_eq!(session.writer().len(), 3);
}

#[test]
fn test_instances_are_deduplicated() {
    let data = cube();
    let opts = ExportOptions::default().with_packed_transform(PackedTransform::TransformGeometry);
    let frame = || {
        let mut sample = SampleTree::new();
        sample.ensure_xform("/geo");
        let packed = PackedGeometry::new(GeometrySource::Inline { geometry_id: 3 }, vec![mesh(&data)]);
        sample.add_packed("/geo", "rock", &packed, &opts).unwrap();
        sample
            .add_packed("/geo", "rock", &packed.clone().with_transform(DMat4::from_translation(DVec3::X * 4.0)), &opts)
            .unwrap();
        sample
    };

    let mut session = ExportSession::new(MemoryArchive::new(), opts.clone());
    run(&mut session, &frame());
    let objects = session.writer().len();
    assert_eq!(session.registry().len(), 1);
    assert_eq!(session.writer().instance_count(), 1);

    run(&mut session, &frame());
    assert_eq!(session.writer().len(), objects);
    assert_eq!(session.registry().len(), 1);

    let (archive, _) = session.finish();
    let source = archive.find("/geo/rock_packed1/rock").unwrap();
    let instance = archive.object(archive.find("/geo/rock_packed2/rock").unwrap()).unwrap();
    assert_eq!(instance.kind, RecordedKind::Instance(source));
    assert!(instance.samples.is_empty());
    assert_eq!(archive.value_writes(source), 1);
    assert_lockstep(&archive, 2);

    // Second copy sits four units along x.
    let bounds = archive.archive_bounds()[1];
    assert_eq!(bounds.max, DVec3::new(5.0, 1.0, 1.0));
}

#[test]
fn test_unchanged_transform_written_from_previous() {
    let data = cube();
    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default().with_full_bounds(true));
    for y in [2.0, 2.0, 3.0] {
        let mut sample = SampleTree::new();
        sample
            .ensure_xform("/geo")
            .set_xform(DMat4::from_translation(DVec3::Y * y))
            .append_shape("box", ShapeEntry::new(mesh(&data)));
        run(&mut session, &sample);
    }

    let (archive, _) = session.finish();
    let geo = archive.find("/geo").unwrap();
    let obj = archive.object(geo).unwrap();
    assert!(matches!(obj.samples[1].value, ValueWrite::FromPrevious));
    assert_eq!(archive.value_writes(geo), 2);
    assert_eq!(obj.samples[0].child_bounds, Some([[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]));

    let bounds = archive.archive_bounds();
    assert_eq!(bounds.len(), 3);
    assert_eq!(bounds[0].min, DVec3::new(0.0, 2.0, 0.0));
    assert_eq!(bounds[2].max, DVec3::new(1.0, 4.0, 1.0));
}

#[test]
fn test_lock_freezes_subtree() {
    let data = cube();
    let frame = |x: f64| {
        let mut sample = SampleTree::new();
        sample
            .ensure_xform("/geo")
            .set_xform(DMat4::from_translation(DVec3::X * x))
            .append_shape("box", ShapeEntry::new(mesh(&data)));
        sample
    };

    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
    run(&mut session, &frame(1.0));
    let geo = session.find("/geo").unwrap();
    session.lock(geo, true).unwrap();
    run(&mut session, &frame(2.0));
    run(&mut session, &SampleTree::new());
    session.lock(geo, false).unwrap();
    run(&mut session, &frame(3.0));

    let (archive, _) = session.finish();
    let handle = archive.find("/geo").unwrap();
    let value = |i| match archive.resolved_value(handle, i) {
        Some(SampleValue::Xform(m)) => m.w_axis.x,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!([value(0), value(1), value(2), value(3)], [1.0, 1.0, 1.0, 3.0]);
    // Locked nodes stay visible even when the frame proposes nothing.
    assert_eq!(archive.visibilities("/geo/box"), [SHOWN, SHOWN, SHOWN, SHOWN]);
    assert_lockstep(&archive, 4);
}

#[test]
fn test_rebind_starts_new_archive() {
    let data = cube();
    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
    run(&mut session, &shapes_frame(&data, &["a", "b"]));
    run(&mut session, &shapes_frame(&data, &["a", "b"]));

    let old = session.rebind(MemoryArchive::new());
    assert_eq!(session.frame(), 0);
    assert_lockstep(&old, 2);

    run(&mut session, &shapes_frame(&data, &["a"]));
    let (archive, _) = session.finish();
    assert_eq!(archive.child_names(archive.root()), ["a", "b"]);
    assert_eq!(archive.visibilities("/a"), [SHOWN]);
    assert_eq!(archive.visibilities("/b"), [HIDDEN]);
    assert_lockstep(&archive, 1);
}

#[test]
fn test_rebind_recreates_instances_in_new_archive() {
    let data = cube();
    let opts = ExportOptions::default().with_packed_transform(PackedTransform::TransformGeometry);
    let frame = || {
        let mut sample = SampleTree::new();
        sample.ensure_xform("/geo");
        let packed = PackedGeometry::new(GeometrySource::Inline { geometry_id: 5 }, vec![mesh(&data)]);
        let copies = [DMat4::IDENTITY, DMat4::from_translation(DVec3::Z * 2.0)];
        sample.add_instances("/geo", "tree", &packed, &copies, &opts).unwrap();
        sample
    };

    let mut session = ExportSession::new(MemoryArchive::new(), opts.clone());
    run(&mut session, &frame());
    run(&mut session, &frame());
    let old = session.rebind(MemoryArchive::new());
    run(&mut session, &frame());
    run(&mut session, &frame());

    let (archive, diagnostics) = session.finish();
    assert!(diagnostics.errors().is_empty());
    assert_eq!(archive.len(), old.len());
    let source = archive.find("/geo/tree_instance1/tree").unwrap();
    let instance = archive.object(archive.find("/geo/tree_instance2/tree").unwrap()).unwrap();
    assert_eq!(instance.kind, RecordedKind::Instance(source));
    assert_lockstep(&old, 2);
    assert_lockstep(&archive, 2);
}

#[test]
fn test_errors_are_collected_once() {
    let data = cube();
    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
    let sample = shapes_frame(&data, &["a"]);
    for _ in 0..2 {
        let err = session.reconcile(&sample, 3).unwrap_err();
        assert!(matches!(err, Error::FrameOutOfOrder { expected: 0, got: 3 }));
    }

    let packed = PackedGeometry::new(GeometrySource::Inline { geometry_id: 1 }, vec![mesh(&data)]);
    let err = SampleTree::new()
        .add_packed("/missing", "p", &packed, session.options())
        .unwrap_err();
    session.report_error(&err);
    session.report_error(&err);
    run(&mut session, &sample);

    let (archive, diagnostics) = session.finish();
    assert_eq!(
        diagnostics.errors(),
        [
            "Frame out of order: expected 0, got 3",
            "Configuration error: Transform /missing not found",
        ]
    );
    assert_eq!(archive.visibilities("/a"), [SHOWN]);
}

#[test]
fn test_pushed_transform_reaches_parent_xform() {
    let data = cube();
    let opts = ExportOptions::default().with_packed_transform(PackedTransform::MergeWithParentTransform);
    let mut sample = SampleTree::new();
    sample.ensure_xform("/geo").set_xform(DMat4::from_translation(DVec3::Y));
    let packed = PackedGeometry::new(GeometrySource::Inline { geometry_id: 9 }, vec![mesh(&data)])
        .with_transform(DMat4::from_translation(DVec3::X * 2.0));
    sample.add_packed("/geo", "rock", &packed, &opts).unwrap();

    let mut session = ExportSession::new(MemoryArchive::new(), opts.clone());
    run(&mut session, &sample);

    let (archive, _) = session.finish();
    let geo = archive.find("/geo").unwrap();
    match archive.resolved_value(geo, 0) {
        Some(SampleValue::Xform(m)) => assert_eq!(m.w_axis.truncate(), DVec3::new(2.0, 1.0, 0.0)),
        other => panic!("unexpected value {other:?}"),
    }
    // The shape itself stays in the parent's local space.
    assert_eq!(archive.archive_bounds()[0].min, DVec3::new(2.0, 1.0, 0.0));
}

#[test]
fn test_instancing_disabled_folds_packed_geometry() {
    let data = cube();
    let opts = ExportOptions::default()
        .with_packed_transform(PackedTransform::TransformGeometry)
        .with_instancing(false);
    let mut sample = SampleTree::new();
    sample.ensure_xform("/geo");
    let packed = PackedGeometry::new(GeometrySource::Inline { geometry_id: 2 }, vec![mesh(&data)]);
    sample.add_packed("/geo", "rock", &packed, &opts).unwrap();
    sample
        .add_packed("/geo", "rock", &packed.with_transform(DMat4::from_translation(DVec3::X * 4.0)), &opts)
        .unwrap();

    let mut session = ExportSession::new(MemoryArchive::new(), opts.clone());
    run(&mut session, &sample);
    assert!(session.registry().is_empty());

    let (archive, _) = session.finish();
    assert_eq!(archive.instance_count(), 0);
    assert_eq!(archive.child_names(archive.find("/geo").unwrap()), ["rock", "rock_1"]);
    match archive.resolved_value(archive.find("/geo/rock_1").unwrap(), 0) {
        Some(SampleValue::Shape(shape)) => assert_eq!(shape.bounds, [[4.0, 0.0, 0.0], [5.0, 1.0, 1.0]]),
        other => panic!("unexpected value {other:?}"),
    }
}

#[test]
fn test_packed_subd_group_is_written() {
    let data = cube();
    let packed = PackedGeometry::new(GeometrySource::Inline { geometry_id: 4 }, vec![mesh(&data)])
        .with_subd(true)
        .with_subd_group("creases");

    for (policy, path) in [
        (PackedTransform::DeformGeometry, "/geo/rock"),
        (PackedTransform::TransformGeometry, "/geo/rock_packed1/rock"),
    ] {
        let opts = ExportOptions::default().with_packed_transform(policy);
        let mut sample = SampleTree::new();
        sample.ensure_xform("/geo");
        sample.add_packed("/geo", "rock", &packed, &opts).unwrap();

        let mut session = ExportSession::new(MemoryArchive::new(), opts.clone());
        run(&mut session, &sample);
        let (archive, _) = session.finish();
        match archive.resolved_value(archive.find(path).unwrap(), 0) {
            Some(SampleValue::Shape(shape)) => assert_eq!(shape.subd_group.as_deref(), Some("creases"), "{path}"),
            other => panic!("unexpected value at {path}: {other:?}"),
        }
    }
}

#[test]
fn test_collisions_are_reported() {
    let data = cube();
    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
    let mut sample = SampleTree::new();
    sample.root_mut().child_xform("n");
    sample.root_mut().append_shape("n", ShapeEntry::new(mesh(&data)));
    run(&mut session, &sample);

    let (archive, diagnostics) = session.finish();
    assert_eq!(archive.child_names(archive.root()), ["n", "n_1"]);
    assert_eq!(diagnostics.warnings(), ["Renaming node to /n_1 to resolve collision."]);
}

#[test]
fn test_warnings_are_reported_once() {
    let data = cube();
    let opts = ExportOptions::default().with_packed_transform(PackedTransform::MergeWithParentTransform);
    let frame = || {
        let mut sample = SampleTree::new();
        sample.ensure_xform("/geo");
        for (id, x) in [(1, 1.0), (2, 2.0)] {
            let packed = PackedGeometry::new(GeometrySource::Inline { geometry_id: id }, vec![mesh(&data)])
                .with_transform(DMat4::from_translation(DVec3::X * x));
            sample.add_packed("/geo", "p", &packed, &opts).unwrap();
        }
        sample.report_cook_failure("/geo/broken", "no points");
        sample
    };

    let mut session = ExportSession::new(MemoryArchive::new(), opts.clone());
    run(&mut session, &frame());
    run(&mut session, &frame());

    let (_, diagnostics) = session.finish();
    let count = |m: &str| diagnostics.warnings().iter().filter(|w| *w == m).count();
    assert_eq!(count("Cannot push multiple packed primitive transforms to /geo."), 1);
    assert_eq!(count("Error cooking /geo/broken: no points"), 1);
}

#[test]
fn test_cameras_carry_no_visibility() {
    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
    for focal in [35.0, 35.0, 50.0] {
        let mut sample = SampleTree::new();
        sample
            .ensure_xform("/cam")
            .set_camera("shot", CameraSample::default().with_focal_length(focal));
        run(&mut session, &sample);
    }

    let (archive, _) = session.finish();
    let cam = archive.find("/cam/shot").unwrap();
    assert_eq!(archive.visibilities("/cam/shot"), [None, None, None]);
    assert_eq!(archive.value_writes(cam), 2);
    match archive.resolved_value(cam, 1) {
        Some(SampleValue::Camera(c)) => assert_eq!(c.focal_length, 35.0),
        other => panic!("unexpected value {other:?}"),
    }
}

#[test]
fn test_save_without_reconcile_hides_everything() {
    let data = cube();
    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
    run(&mut session, &shapes_frame(&data, &["a"]));
    session.save(&LayerOptions::new()).unwrap();

    let (archive, _) = session.finish();
    assert_eq!(archive.visibilities("/a"), [SHOWN, HIDDEN]);
}

#[test]
fn test_json_dump_round_trips_through_disk() {
    let data = cube();
    let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
    run(&mut session, &shapes_frame(&data, &["a"]));
    let (archive, _) = session.finish();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.json");
    archive.save_json(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["objects"][1]["path"], "/a");
}
