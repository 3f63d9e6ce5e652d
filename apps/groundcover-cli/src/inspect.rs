use std::collections::BTreeMap;

use groundcover_common::EntityId;
use groundcover_kernel::{Dataset, EntityStore, TypeCatalog};
use groundcover_stream::SpatialIndex;

/// Read-only queries over a dataset for the command line.
pub struct DatasetInspector;

impl DatasetInspector {
    pub fn summary(dataset: &Dataset, catalog: &TypeCatalog) -> DatasetSummary {
        let mut per_type: BTreeMap<String, usize> = BTreeMap::new();
        for record in &dataset.records {
            *per_type.entry(record.type_name.clone()).or_default() += 1;
        }
        let store = EntityStore::new(dataset.clone(), catalog);
        DatasetSummary {
            version: dataset.version,
            records: dataset.len(),
            destroyed: dataset.records.iter().filter(|r| r.is_destroyed()).count(),
            per_type,
            state_hash: store.state_hash(),
        }
    }

    pub fn inspect_entity(dataset: &Dataset, id: EntityId) -> Option<EntityInfo> {
        dataset.get(id).map(|record| {
            let t = record.transform.decompose();
            EntityInfo {
                id,
                type_name: record.type_name.clone(),
                health: record.health,
                position: t.position.to_array(),
                rotation: t.rotation.to_array(),
                scale: t.scale.to_array(),
            }
        })
    }

    /// Cells sorted by member count, largest first.
    pub fn densest_cells(index: &SpatialIndex, limit: usize) -> Vec<(i32, i32, usize)> {
        let mut cells: Vec<(i32, i32, usize)> = index
            .cells()
            .iter()
            .map(|c| (c.coord.x, c.coord.z, c.members.len()))
            .collect();
        cells.sort_by(|a, b| b.2.cmp(&a.2).then((a.0, a.1).cmp(&(b.0, b.1))));
        cells.truncate(limit);
        cells
    }
}

#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub version: u32,
    pub records: usize,
    pub destroyed: usize,
    pub per_type: BTreeMap<String, usize>,
    pub state_hash: u64,
}

impl std::fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Dataset: version={} records={} destroyed={} hash={:#018x}",
            self.version, self.records, self.destroyed, self.state_hash
        )?;
        for (name, count) in &self.per_type {
            write!(f, "\n  {name}: {count}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub id: EntityId,
    pub type_name: String,
    pub health: f32,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl std::fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Entity {} [{}] health={:.1} pos=({:.2}, {:.2}, {:.2}) scale=({:.2}, {:.2}, {:.2})",
            self.id,
            self.type_name,
            self.health,
            self.position[0],
            self.position[1],
            self.position[2],
            self.scale[0],
            self.scale[1],
            self.scale[2],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use groundcover_common::{BoundingShape, TransformMatrix};
    use groundcover_kernel::EntityRecord;
    use groundcover_stream::GridConfig;

    fn dataset() -> Dataset {
        let mut records: Vec<EntityRecord> = [(1.0, 2.0, "oak"), (3.0, 4.0, "oak"), (60.0, 60.0, "pine")]
            .iter()
            .enumerate()
            .map(|(i, (x, z, kind))| {
                EntityRecord::new(
                    EntityId(i as u32),
                    *kind,
                    TransformMatrix::from_translation(Vec3::new(*x, 0.0, *z)),
                    100.0,
                )
            })
            .collect();
        records[1].health = 0.0;
        Dataset::new(3, records)
    }

    #[test]
    fn summary_counts_types_and_destroyed() {
        let catalog = TypeCatalog::new().with_type("oak", BoundingShape::default());
        let summary = DatasetInspector::summary(&dataset(), &catalog);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.destroyed, 1);
        assert_eq!(summary.per_type["oak"], 2);
        assert_eq!(summary.per_type["pine"], 1);
        let text = summary.to_string();
        assert!(text.contains("version=3"));
        assert!(text.contains("pine: 1"));
    }

    #[test]
    fn inspect_entity_found() {
        let info = DatasetInspector::inspect_entity(&dataset(), EntityId(2)).unwrap();
        assert_eq!(info.position, [60.0, 0.0, 60.0]);
        assert_eq!(info.type_name, "pine");
    }

    #[test]
    fn inspect_entity_not_found() {
        assert!(DatasetInspector::inspect_entity(&dataset(), EntityId(9)).is_none());
    }

    #[test]
    fn densest_cells_first() {
        let index = SpatialIndex::build(GridConfig::new(100.0, 10.0), &dataset().records).unwrap();
        let cells = DatasetInspector::densest_cells(&index, 1);
        assert_eq!(cells, vec![(0, 0, 2)]);
    }
}
