use std::collections::HashMap;

use glam::Vec3;
use groundcover_kernel::Dataset;

/// Merges a newer template with an older save without losing damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetReconciler {
    pub current_version: u32,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub dataset: Dataset,
    /// Template records whose health was taken from the save.
    pub carried: usize,
    pub previous_version: u32,
}

/// Exact match key: type name plus position bits.
type MatchKey<'a> = (&'a str, [u32; 3]);

impl DatasetReconciler {
    pub fn new(current_version: u32) -> Self {
        Self { current_version }
    }

    pub fn needs_upgrade(&self, saved: &Dataset) -> bool {
        saved.version < self.current_version
    }

    /// Copy health from saved records onto template records with the same
    /// type and exactly the same position. The last saved match wins.
    pub fn reconcile(&self, template: Dataset, saved: &Dataset) -> Reconciliation {
        let _span = tracing::info_span!(
            "reconcile",
            from = saved.version,
            to = self.current_version
        )
        .entered();

        let mut saved_health: HashMap<MatchKey<'_>, f32> = HashMap::with_capacity(saved.len());
        for record in &saved.records {
            if let Some(bits) = position_bits(record.position()) {
                saved_health.insert((record.type_name.as_str(), bits), record.health);
            }
        }

        let mut merged = template;
        let mut carried = 0;
        for record in &mut merged.records {
            let Some(bits) = position_bits(record.position()) else {
                continue;
            };
            if let Some(health) = saved_health.get(&(record.type_name.as_str(), bits)) {
                record.health = *health;
                carried += 1;
            }
        }
        merged.version = self.current_version;

        tracing::info!(
            records = merged.len(),
            carried,
            "dataset reconciled"
        );
        Reconciliation {
            dataset: merged,
            carried,
            previous_version: saved.version,
        }
    }
}

/// `None` for NaN so it never matches; `-0.0` folds onto `0.0`.
fn position_bits(p: Vec3) -> Option<[u32; 3]> {
    let mut out = [0u32; 3];
    for (slot, v) in out.iter_mut().zip(p.to_array()) {
        if v.is_nan() {
            return None;
        }
        *slot = if v == 0.0 { 0.0f32.to_bits() } else { v.to_bits() };
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundcover_common::{EntityId, TransformMatrix};
    use groundcover_kernel::EntityRecord;

    fn record(id: u32, ty: &str, pos: Vec3, health: f32) -> EntityRecord {
        EntityRecord::new(EntityId(id), ty, TransformMatrix::from_translation(pos), health)
    }

    #[test]
    fn damage_survives_upgrade() {
        let saved = Dataset::new(
            1,
            vec![
                record(0, "oak", Vec3::new(1.0, 0.0, 1.0), 40.0),
                record(1, "pine", Vec3::new(5.0, 0.0, 5.0), 0.0),
            ],
        );
        let template = Dataset::new(
            2,
            vec![
                record(0, "birch", Vec3::new(9.0, 0.0, 9.0), 100.0),
                record(1, "pine", Vec3::new(5.0, 0.0, 5.0), 100.0),
                record(2, "oak", Vec3::new(1.0, 0.0, 1.0), 100.0),
            ],
        );
        let out = DatasetReconciler::new(2).reconcile(template, &saved);
        assert_eq!(out.carried, 2);
        assert_eq!(out.previous_version, 1);
        assert_eq!(out.dataset.version, 2);
        let healths: Vec<f32> = out.dataset.records.iter().map(|r| r.health).collect();
        assert_eq!(healths, vec![100.0, 0.0, 40.0]);
    }

    #[test]
    fn type_and_position_must_both_match() {
        let saved = Dataset::new(1, vec![record(0, "oak", Vec3::new(1.0, 0.0, 1.0), 10.0)]);
        let template = Dataset::new(
            2,
            vec![
                record(0, "pine", Vec3::new(1.0, 0.0, 1.0), 100.0),
                record(1, "oak", Vec3::new(1.0, 0.0, 1.0001), 100.0),
            ],
        );
        let out = DatasetReconciler::new(2).reconcile(template, &saved);
        assert_eq!(out.carried, 0);
        assert!(out.dataset.records.iter().all(|r| r.health == 100.0));
    }

    #[test]
    fn last_saved_match_wins() {
        let pos = Vec3::new(3.0, 0.0, 3.0);
        let saved = Dataset::new(1, vec![record(0, "oak", pos, 10.0), record(1, "oak", pos, 20.0)]);
        let template = Dataset::new(2, vec![record(0, "oak", pos, 100.0)]);
        let out = DatasetReconciler::new(2).reconcile(template, &saved);
        assert_eq!(out.dataset.records[0].health, 20.0);
    }

    #[test]
    fn signed_zero_matches_and_nan_does_not() {
        let saved = Dataset::new(
            1,
            vec![
                record(0, "oak", Vec3::new(-0.0, 0.0, 0.0), 5.0),
                record(1, "oak", Vec3::new(f32::NAN, 0.0, 0.0), 6.0),
            ],
        );
        let template = Dataset::new(
            2,
            vec![
                record(0, "oak", Vec3::new(0.0, 0.0, 0.0), 100.0),
                record(1, "oak", Vec3::new(f32::NAN, 0.0, 0.0), 100.0),
            ],
        );
        let out = DatasetReconciler::new(2).reconcile(template, &saved);
        assert_eq!(out.dataset.records[0].health, 5.0);
        assert_eq!(out.dataset.records[1].health, 100.0);
    }

    #[test]
    fn needs_upgrade_only_for_older_saves() {
        let r = DatasetReconciler::new(3);
        assert!(r.needs_upgrade(&Dataset::new(2, vec![])));
        assert!(!r.needs_upgrade(&Dataset::new(3, vec![])));
        assert!(!r.needs_upgrade(&Dataset::new(4, vec![])));
    }
}
