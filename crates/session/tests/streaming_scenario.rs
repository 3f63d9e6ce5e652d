use std::sync::Arc;

use glam::Vec3;
use groundcover_common::{BoundingShape, EntityId, TransformMatrix};
use groundcover_kernel::{Dataset, EntityRecord, TypeCatalog};
use groundcover_persist::MemorySaveStore;
use groundcover_render::RecordingBackend;
use groundcover_session::{GroundcoverConfig, Persistence, WorldSession};
use groundcover_stream::{GridConfig, ObserverPoint};

fn three_trees() -> Dataset {
    let records = [0.0, 50.0, 99.0]
        .iter()
        .enumerate()
        .map(|(i, x)| {
            EntityRecord::new(
                EntityId(i as u32),
                "birch",
                TransformMatrix::from_translation(Vec3::new(*x, 0.0, 5.0)),
                100.0,
            )
        })
        .collect();
    Dataset::new(1, records)
}

fn world() -> WorldSession<RecordingBackend> {
    let config = GroundcoverConfig {
        grid: GridConfig::new(100.0, 10.0),
        ..GroundcoverConfig::default()
    };
    WorldSession::load_host(
        &config,
        &three_trees(),
        &TypeCatalog::new().with_type("birch", BoundingShape::default()),
        Persistence::new(MemorySaveStore::new(), "forest"),
        RecordingBackend::new(),
    )
    .unwrap()
}

#[test]
fn walking_observer_holds_exactly_one_instance() {
    let mut world = world();
    assert_eq!(world.controller().index().len(), 3);

    let observer = Arc::new(ObserverPoint::new(Vec3::new(5.0, 0.0, 5.0)));
    world.register_observer(&observer);

    world.refresh().unwrap();
    let stats = world.controller().stats();
    assert_eq!(stats.allocated, 1);
    let near = world.controller().cell_of(EntityId(0)).unwrap();
    assert_eq!(world.controller().allocated_in(near), vec![EntityId(0)]);

    // Repeated passes with a still observer change nothing.
    let report = world.refresh().unwrap();
    assert!(report.loaded.is_empty() && report.unloaded.is_empty());
    assert_eq!(world.controller().stats().allocated, 1);

    observer.set_position(Vec3::new(95.0, 0.0, 5.0));
    let report = world.refresh().unwrap();
    let far = world.controller().cell_of(EntityId(2)).unwrap();
    assert_eq!(report.unloaded, vec![near]);
    assert_eq!(report.loaded, vec![far]);
    assert_eq!(world.controller().stats().allocated, 1);
    assert_eq!(world.controller().allocated_in(far), vec![EntityId(2)]);
    assert!(world.controller().allocated_in(near).is_empty());

    // The pool never grew past the single instance it needed.
    let pool = world.controller().stats().pool;
    assert_eq!(pool.allocated_count, 1);
    assert_eq!(pool.free_count + pool.allocated_count, pool.total);
}

#[test]
fn observer_in_empty_area_allocates_nothing() {
    let mut world = world();
    let observer = Arc::new(ObserverPoint::new(Vec3::new(25.0, 0.0, 75.0)));
    world.register_observer(&observer);
    let report = world.refresh().unwrap();
    assert!(report.loaded.is_empty());
    assert_eq!(world.controller().stats().allocated, 0);
}

#[test]
fn dropped_observer_unloads_its_cell() {
    let mut world = world();
    let observer = Arc::new(ObserverPoint::new(Vec3::new(52.0, 0.0, 4.0)));
    world.register_observer(&observer);
    world.refresh().unwrap();
    assert_eq!(world.controller().stats().allocated, 1);

    drop(observer);
    let report = world.refresh().unwrap();
    assert_eq!(report.unloaded.len(), 1);
    assert_eq!(report.observers, 0);
    assert_eq!(world.controller().stats().allocated, 0);
}

#[test]
fn destroying_the_streamed_tree_releases_its_instance() {
    let mut world = world();
    let observer = Arc::new(ObserverPoint::new(Vec3::new(5.0, 0.0, 5.0)));
    world.register_observer(&observer);
    world.refresh().unwrap();

    world.apply_damage(EntityId(0), 100.0).unwrap();
    assert_eq!(world.controller().stats().allocated, 0);
    assert_eq!(world.backend().batch("birch").unwrap().matrices.len(), 2);

    // A resync cannot bring a destroyed tree back.
    assert_eq!(world.resync(&[EntityId(0)]).unwrap(), 0);
    world.refresh().unwrap();
    assert_eq!(world.controller().stats().allocated, 0);
}
