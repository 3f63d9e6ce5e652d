use glam::{Quat, Vec3};
use groundcover_common::{BoundingShape, EntityId, Transform, TransformMatrix};
use groundcover_kernel::{Dataset, EntityRecord, TypeCatalog};
use groundcover_stream::GridConfig;

/// Entity types the generator scatters, with their bounding shapes.
pub const TYPES: [(&str, BoundingShape); 3] = [
    (
        "oak",
        BoundingShape::Capsule {
            center: Vec3::new(0.0, 4.0, 0.0),
            radius: 0.6,
            height: 8.0,
        },
    ),
    (
        "pine",
        BoundingShape::Capsule {
            center: Vec3::new(0.0, 6.0, 0.0),
            radius: 0.4,
            height: 12.0,
        },
    ),
    (
        "boulder",
        BoundingShape::Box {
            center: Vec3::new(0.0, 0.5, 0.0),
            size: Vec3::new(1.5, 1.0, 1.5),
        },
    ),
];

pub fn catalog() -> TypeCatalog {
    TYPES
        .iter()
        .fold(TypeCatalog::new(), |c, (name, shape)| c.with_type(*name, *shape))
}

/// Scatter `count` entities uniformly over the grid. Same seed, same dataset.
pub fn template(grid: &GridConfig, count: u32, seed: u64, version: u32) -> Dataset {
    let mut rng = seed;
    let records = (0..count)
        .map(|i| {
            let x = unit(&mut rng) * grid.extent;
            let z = unit(&mut rng) * grid.extent;
            let yaw = unit(&mut rng) * std::f32::consts::TAU;
            let scale = 0.8 + unit(&mut rng) * 0.4;
            let (name, _) = TYPES[(splitmix64(&mut rng) % TYPES.len() as u64) as usize];
            let transform = Transform {
                position: Vec3::new(x, 0.0, z),
                rotation: Quat::from_rotation_y(yaw),
                scale: Vec3::splat(scale),
            };
            EntityRecord::new(EntityId(i), name, TransformMatrix::from_transform(&transform), 100.0)
        })
        .collect();
    Dataset::new(version, records)
}

/// Uniform in `[0, 1)`.
fn unit(state: &mut u64) -> f32 {
    (splitmix64(state) >> 40) as f32 / (1u64 << 24) as f32
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundcover_stream::SpatialIndex;

    #[test]
    fn same_seed_same_template() {
        let grid = GridConfig::default();
        assert_eq!(template(&grid, 50, 9, 1), template(&grid, 50, 9, 1));
        assert_ne!(template(&grid, 50, 9, 1), template(&grid, 50, 10, 1));
    }

    #[test]
    fn generated_template_indexes_cleanly() {
        let grid = GridConfig::new(200.0, 25.0);
        let dataset = template(&grid, 300, 3, 1);
        dataset.validate().unwrap();
        let index = SpatialIndex::build(grid, &dataset.records).unwrap();
        assert_eq!(index.total_placements(), 300);
    }

    #[test]
    fn every_generated_type_is_catalogued() {
        let dataset = template(&GridConfig::default(), 100, 1, 1);
        let catalog = catalog();
        assert!(dataset.records.iter().all(|r| catalog.get(&r.type_name).is_some()));
    }
}
