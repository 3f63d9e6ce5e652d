use std::collections::{HashMap, HashSet};

use glam::Vec3;
use groundcover_common::{CellId, EntityId};
use groundcover_kernel::EntityRecord;
use serde::{Deserialize, Serialize};

/// Errors raised while building or validating the spatial index.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("invalid grid config: {0}")]
    InvalidConfig(String),
    #[error("entity {id} at {position:?} lies outside the world bounds")]
    OutOfBounds { id: EntityId, position: [f32; 3] },
    #[error("entity {id} maps to a cell that does not exist")]
    MissingCell { id: EntityId },
    #[error("entity {id} is not listed in cell {cell:?}")]
    NotListed { id: EntityId, cell: CellId },
    #[error("corrupt spatial index: {0}")]
    CorruptIndex(String),
}

/// Square world on X/Z, `[0, extent]` per axis, split into `cell_size` cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub extent: f32,
    pub cell_size: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            extent: 1000.0,
            cell_size: 50.0,
        }
    }
}

impl GridConfig {
    pub fn new(extent: f32, cell_size: f32) -> Self {
        Self { extent, cell_size }
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(GenerationError::InvalidConfig(format!(
                "cell_size must be positive, got {}",
                self.cell_size
            )));
        }
        if !(self.extent.is_finite() && self.extent >= self.cell_size) {
            return Err(GenerationError::InvalidConfig(format!(
                "extent {} must be at least cell_size {}",
                self.extent, self.cell_size
            )));
        }
        Ok(())
    }

    /// Cells per horizontal axis.
    pub fn cells_per_axis(&self) -> i32 {
        (self.extent / self.cell_size).ceil() as i32
    }

    /// `floor(axis / cell_size)` on X and Z. A position on the far edge folds
    /// into the last cell; anything outside `[0, extent]` has no cell.
    ///
    /// The mapping is bijective over the grid: cells are not mirrored around
    /// the world centre, so opposite sides of the centre never share a cell.
    pub fn cell_coord_for_position(&self, pos: Vec3) -> Option<CellCoord> {
        let last = self.cells_per_axis() - 1;
        let axis = |v: f32| -> Option<i32> {
            if !(0.0..=self.extent).contains(&v) {
                return None;
            }
            Some(((v / self.cell_size).floor() as i32).min(last))
        };
        Some(CellCoord::new(axis(pos.x)?, axis(pos.z)?))
    }
}

/// A 2D cell coordinate in the world grid (Y is ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

/// A non-empty grid cell and the entities whose position falls inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialCell {
    pub id: CellId,
    pub coord: CellCoord,
    /// Build order.
    pub members: Vec<EntityId>,
}

/// Sparse grid over the entity dataset. Serializable; the lookup tables are
/// rebuilt on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IndexRepr", into = "IndexRepr")]
pub struct SpatialIndex {
    config: GridConfig,
    cells: Vec<SpatialCell>,
    by_coord: HashMap<CellCoord, CellId>,
    by_entity: HashMap<EntityId, CellId>,
}

#[derive(Serialize, Deserialize)]
struct IndexRepr {
    config: GridConfig,
    cells: Vec<SpatialCell>,
}

impl TryFrom<IndexRepr> for SpatialIndex {
    type Error = GenerationError;

    /// Cell ids must run `0..n` in order and no coordinate may repeat.
    fn try_from(repr: IndexRepr) -> Result<Self, Self::Error> {
        repr.config.validate()?;
        let mut seen = HashSet::new();
        for (index, cell) in repr.cells.iter().enumerate() {
            if cell.id.index() != index {
                return Err(GenerationError::CorruptIndex(format!(
                    "cell at position {index} has id {:?}",
                    cell.id
                )));
            }
            if !seen.insert(cell.coord) {
                return Err(GenerationError::CorruptIndex(format!(
                    "coordinate ({}, {}) appears twice",
                    cell.coord.x, cell.coord.z
                )));
            }
        }
        Ok(Self::from_cells(repr.config, repr.cells))
    }
}

impl From<SpatialIndex> for IndexRepr {
    fn from(index: SpatialIndex) -> Self {
        Self {
            config: index.config,
            cells: index.cells,
        }
    }
}

impl SpatialIndex {
    /// Bucket every record into its cell, creating cells on first use with
    /// sequential ids, then validate the result.
    pub fn build(config: GridConfig, records: &[EntityRecord]) -> Result<Self, GenerationError> {
        config.validate()?;
        let mut cells: Vec<SpatialCell> = Vec::new();
        let mut by_coord: HashMap<CellCoord, CellId> = HashMap::new();

        for record in records {
            let position = record.position();
            let coord = config
                .cell_coord_for_position(position)
                .ok_or(GenerationError::OutOfBounds {
                    id: record.id,
                    position: position.to_array(),
                })?;
            let id = *by_coord.entry(coord).or_insert_with(|| {
                let id = CellId(cells.len() as u32);
                cells.push(SpatialCell {
                    id,
                    coord,
                    members: Vec::new(),
                });
                id
            });
            cells[id.index()].members.push(record.id);
        }

        let index = Self::from_cells(config, cells);
        index.validate(records)?;
        tracing::info!(
            records = records.len(),
            cells = index.cells.len(),
            "spatial index built"
        );
        Ok(index)
    }

    fn from_cells(config: GridConfig, cells: Vec<SpatialCell>) -> Self {
        let by_coord = cells.iter().map(|c| (c.coord, c.id)).collect();
        let by_entity = cells
            .iter()
            .flat_map(|c| c.members.iter().map(move |m| (*m, c.id)))
            .collect();
        Self {
            config,
            cells,
            by_coord,
            by_entity,
        }
    }

    /// Every record must resolve to an existing cell that lists its id.
    pub fn validate(&self, records: &[EntityRecord]) -> Result<(), GenerationError> {
        for record in records {
            let position = record.position();
            let coord = self
                .config
                .cell_coord_for_position(position)
                .ok_or(GenerationError::OutOfBounds {
                    id: record.id,
                    position: position.to_array(),
                })?;
            let cell = self
                .cell_at(coord)
                .ok_or(GenerationError::MissingCell { id: record.id })?;
            if !cell.members.contains(&record.id) {
                return Err(GenerationError::NotListed {
                    id: record.id,
                    cell: cell.id,
                });
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn cell_coord_for_position(&self, pos: Vec3) -> Option<CellCoord> {
        self.config.cell_coord_for_position(pos)
    }

    pub fn cell_at(&self, coord: CellCoord) -> Option<&SpatialCell> {
        self.by_coord.get(&coord).and_then(|id| self.cells.get(id.index()))
    }

    pub fn cell(&self, id: CellId) -> Option<&SpatialCell> {
        self.cells.get(id.index())
    }

    /// `None` outside the bounds or where no entity was placed.
    pub fn cell_for_position(&self, pos: Vec3) -> Option<&SpatialCell> {
        self.cell_at(self.cell_coord_for_position(pos)?)
    }

    /// Cell that listed `id` at build time.
    pub fn cell_of(&self, id: EntityId) -> Option<CellId> {
        self.by_entity.get(&id).copied()
    }

    pub fn cells(&self) -> &[SpatialCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Total number of entity placements across all cells.
    pub fn total_placements(&self) -> usize {
        self.cells.iter().map(|c| c.members.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundcover_common::TransformMatrix;

    fn records(xs: &[(f32, f32)]) -> Vec<EntityRecord> {
        xs.iter()
            .enumerate()
            .map(|(i, (x, z))| {
                EntityRecord::new(
                    EntityId(i as u32),
                    "oak",
                    TransformMatrix::from_translation(Vec3::new(*x, 0.0, *z)),
                    100.0,
                )
            })
            .collect()
    }

    #[test]
    fn position_to_cell_basic() {
        let config = GridConfig::new(100.0, 10.0);
        assert_eq!(
            config.cell_coord_for_position(Vec3::new(5.0, 30.0, 5.0)),
            Some(CellCoord::new(0, 0))
        );
        assert_eq!(
            config.cell_coord_for_position(Vec3::new(10.0, 0.0, 19.99)),
            Some(CellCoord::new(1, 1))
        );
        assert_eq!(
            config.cell_coord_for_position(Vec3::new(95.0, 0.0, 0.0)),
            Some(CellCoord::new(9, 0))
        );
    }

    #[test]
    fn far_edge_folds_into_last_cell() {
        let config = GridConfig::new(100.0, 10.0);
        assert_eq!(
            config.cell_coord_for_position(Vec3::new(100.0, 0.0, 100.0)),
            Some(CellCoord::new(9, 9))
        );
    }

    #[test]
    fn outside_bounds_has_no_cell() {
        let config = GridConfig::new(100.0, 10.0);
        assert_eq!(config.cell_coord_for_position(Vec3::new(-0.1, 0.0, 5.0)), None);
        assert_eq!(config.cell_coord_for_position(Vec3::new(5.0, 0.0, 100.5)), None);
        assert_eq!(config.cell_coord_for_position(Vec3::new(f32::NAN, 0.0, 5.0)), None);
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(GridConfig::new(100.0, 0.0).validate().is_err());
        assert!(GridConfig::new(5.0, 10.0).validate().is_err());
        assert!(GridConfig::new(100.0, 10.0).validate().is_ok());
    }

    #[test]
    fn build_creates_cells_in_first_use_order() {
        let recs = records(&[(55.0, 5.0), (5.0, 5.0), (56.0, 6.0)]);
        let index = SpatialIndex::build(GridConfig::new(100.0, 10.0), &recs).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.cells()[0].coord, CellCoord::new(5, 0));
        assert_eq!(index.cells()[0].members, vec![EntityId(0), EntityId(2)]);
        assert_eq!(index.cell_of(EntityId(1)), Some(CellId(1)));
        assert_eq!(index.total_placements(), 3);
    }

    #[test]
    fn empty_regions_have_no_cell() {
        let recs = records(&[(5.0, 5.0)]);
        let index = SpatialIndex::build(GridConfig::new(100.0, 10.0), &recs).unwrap();
        assert!(index.cell_for_position(Vec3::new(50.0, 0.0, 50.0)).is_none());
        assert_eq!(
            index.cell_for_position(Vec3::new(1.0, 0.0, 9.0)).map(|c| c.id),
            Some(CellId(0))
        );
    }

    #[test]
    fn out_of_bounds_record_fails_build() {
        let recs = records(&[(5.0, 5.0), (150.0, 5.0)]);
        assert_eq!(
            SpatialIndex::build(GridConfig::new(100.0, 10.0), &recs),
            Err(GenerationError::OutOfBounds {
                id: EntityId(1),
                position: [150.0, 0.0, 5.0]
            })
        );
    }

    #[test]
    fn validate_catches_moved_records() {
        let mut recs = records(&[(5.0, 5.0), (25.0, 5.0)]);
        let index = SpatialIndex::build(GridConfig::new(100.0, 10.0), &recs).unwrap();

        recs[0].transform = TransformMatrix::from_translation(Vec3::new(25.0, 0.0, 5.0));
        assert_eq!(
            index.validate(&recs),
            Err(GenerationError::NotListed {
                id: EntityId(0),
                cell: CellId(1)
            })
        );

        recs[0].transform = TransformMatrix::from_translation(Vec3::new(75.0, 0.0, 75.0));
        assert_eq!(
            index.validate(&recs),
            Err(GenerationError::MissingCell { id: EntityId(0) })
        );
    }

    #[test]
    fn decoded_index_rebuilds_lookups() {
        let recs = records(&[(5.0, 5.0), (95.0, 95.0)]);
        let index = SpatialIndex::build(GridConfig::new(100.0, 10.0), &recs).unwrap();
        let repr = IndexRepr::from(index.clone());
        let decoded = SpatialIndex::try_from(repr).unwrap();
        assert_eq!(decoded, index);
        assert_eq!(decoded.cell_of(EntityId(1)), Some(CellId(1)));
        decoded.validate(&recs).unwrap();
    }

    #[test]
    fn decoded_index_rejects_out_of_order_ids() {
        let config = GridConfig::new(100.0, 10.0);
        let index = SpatialIndex::build(config, &records(&[(1.0, 1.0), (55.0, 55.0)])).unwrap();
        let mut repr = IndexRepr::from(index.clone());
        assert_eq!(SpatialIndex::try_from(repr).unwrap(), index);

        repr = IndexRepr::from(index.clone());
        repr.cells[1].id = CellId(7);
        assert!(matches!(
            SpatialIndex::try_from(repr),
            Err(GenerationError::CorruptIndex(_))
        ));

        repr = IndexRepr::from(index);
        repr.cells[1].coord = repr.cells[0].coord;
        assert!(matches!(
            SpatialIndex::try_from(repr),
            Err(GenerationError::CorruptIndex(_))
        ));
    }
}
