//! Host-side dataset load: save slot, template fallback, version upgrade.

use groundcover_kernel::Dataset;

use crate::codec::Codec;
use crate::reconcile::DatasetReconciler;
use crate::save::SaveStore;

/// Where the loaded dataset came from.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadSource {
    Saved,
    TemplateFallback(FallbackReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    /// First run, nothing saved yet.
    Absent,
    /// The save existed but did not decode.
    Corrupt(String),
    /// The save store itself failed.
    Unreadable(String),
}

/// Outcome of [`load_host_dataset`].
#[derive(Debug, Clone, PartialEq)]
pub struct HostLoad {
    pub dataset: Dataset,
    pub source: LoadSource,
    /// Records carried over when a reconcile ran.
    pub reconciled: Option<usize>,
    /// Whether the dataset was written back and the write succeeded.
    pub persisted: bool,
}

/// Load the host's authoritative dataset. Never fails: every persistence
/// problem degrades to the template and is logged.
pub fn load_host_dataset<C, S>(
    codec: &C,
    saves: &mut S,
    key: &str,
    template: &Dataset,
    reconciler: &DatasetReconciler,
) -> HostLoad
where
    C: Codec,
    S: SaveStore + ?Sized,
{
    let (mut dataset, source) = match saves.load(key) {
        Ok(Some(bytes)) => match codec.decode_dataset(&bytes) {
            Ok(saved) => (saved, LoadSource::Saved),
            Err(err) => {
                tracing::error!(key, error = %err, "save failed to decode, falling back to template");
                (
                    template.clone(),
                    LoadSource::TemplateFallback(FallbackReason::Corrupt(err.to_string())),
                )
            }
        },
        Ok(None) => {
            tracing::info!(key, "no save found, copying template");
            (
                template.clone(),
                LoadSource::TemplateFallback(FallbackReason::Absent),
            )
        }
        Err(err) => {
            tracing::error!(key, operation = "load", error = %err, "save store failed");
            (
                template.clone(),
                LoadSource::TemplateFallback(FallbackReason::Unreadable(err.to_string())),
            )
        }
    };

    let mut must_persist = matches!(source, LoadSource::TemplateFallback(_));
    let mut reconciled = None;
    if reconciler.needs_upgrade(&dataset) {
        let result = reconciler.reconcile(template.clone(), &dataset);
        reconciled = Some(result.carried);
        dataset = result.dataset;
        must_persist = true;
    }

    let persisted = must_persist && persist_dataset(codec, saves, key, &dataset);
    HostLoad {
        dataset,
        source,
        reconciled,
        persisted,
    }
}

/// Encode and save; failures are logged with the operation and reported as `false`.
pub fn persist_dataset<C, S>(codec: &C, saves: &mut S, key: &str, dataset: &Dataset) -> bool
where
    C: Codec,
    S: SaveStore + ?Sized,
{
    let bytes = match codec.encode(dataset) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(key, operation = "encode", error = %err, "persist failed");
            return false;
        }
    };
    match saves.save(key, &bytes) {
        Ok(()) => {
            tracing::debug!(key, bytes = bytes.len(), version = dataset.version, "dataset persisted");
            true
        }
        Err(err) => {
            tracing::error!(key, operation = "save", error = %err, "persist failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CborCodec;
    use crate::save::{MemorySaveStore, SaveError};
    use glam::Vec3;
    use groundcover_common::{EntityId, TransformMatrix};
    use groundcover_kernel::EntityRecord;

    fn template(version: u32) -> Dataset {
        let records = (0..4)
            .map(|i| {
                EntityRecord::new(
                    EntityId(i),
                    "oak",
                    TransformMatrix::from_translation(Vec3::new(i as f32 * 10.0, 0.0, 4.0)),
                    100.0,
                )
            })
            .collect();
        Dataset::new(version, records)
    }

    #[test]
    fn first_run_copies_template() {
        let codec = CborCodec::default();
        let mut saves = MemorySaveStore::new();
        let load = load_host_dataset(&codec, &mut saves, "forest", &template(1), &DatasetReconciler::new(1));
        assert_eq!(load.source, LoadSource::TemplateFallback(FallbackReason::Absent));
        assert!(load.persisted);
        assert_eq!(load.reconciled, None);
        let stored = codec.decode_dataset(&saves.load("forest").unwrap().unwrap()).unwrap();
        assert_eq!(stored, template(1));
    }

    #[test]
    fn current_save_is_used_as_is() {
        let codec = CborCodec::default();
        let mut saves = MemorySaveStore::new();
        let mut saved = template(1);
        saved.records[2].health = 0.0;
        saves.save("forest", &codec.encode(&saved).unwrap()).unwrap();

        let load = load_host_dataset(&codec, &mut saves, "forest", &template(1), &DatasetReconciler::new(1));
        assert_eq!(load.source, LoadSource::Saved);
        assert!(!load.persisted);
        assert_eq!(saves.writes(), 1);
        assert_eq!(load.dataset, saved);
    }

    #[test]
    fn corrupt_save_falls_back_and_repersists() {
        let codec = CborCodec::default();
        let mut saves = MemorySaveStore::new();
        saves.put_raw("forest", vec![0xde, 0xad, 0xbe, 0xef, 0x01, 0x02]);

        let load = load_host_dataset(&codec, &mut saves, "forest", &template(1), &DatasetReconciler::new(1));
        assert!(matches!(
            load.source,
            LoadSource::TemplateFallback(FallbackReason::Corrupt(_))
        ));
        assert!(load.persisted);
        assert_eq!(load.dataset, template(1));
        assert!(codec.decode_dataset(&saves.load("forest").unwrap().unwrap()).is_ok());
    }

    #[test]
    fn stale_save_is_reconciled_and_persisted() {
        let codec = CborCodec::default();
        let mut saves = MemorySaveStore::new();
        let mut saved = template(1);
        saved.records[1].health = 25.0;
        saves.save("forest", &codec.encode(&saved).unwrap()).unwrap();

        let load = load_host_dataset(&codec, &mut saves, "forest", &template(2), &DatasetReconciler::new(2));
        assert_eq!(load.source, LoadSource::Saved);
        assert_eq!(load.reconciled, Some(4));
        assert!(load.persisted);
        assert_eq!(load.dataset.version, 2);
        assert_eq!(load.dataset.records[1].health, 25.0);

        let stored = codec.decode_dataset(&saves.load("forest").unwrap().unwrap()).unwrap();
        assert_eq!(stored, load.dataset);
    }

    struct BrokenStore;

    impl SaveStore for BrokenStore {
        fn load(&self, _key: &str) -> Result<Option<Vec<u8>>, SaveError> {
            Err(SaveError::Io(std::io::Error::other("disk gone")))
        }

        fn save(&mut self, _key: &str, _bytes: &[u8]) -> Result<(), SaveError> {
            Err(SaveError::Io(std::io::Error::other("disk gone")))
        }
    }

    #[test]
    fn store_failures_are_not_fatal() {
        let codec = CborCodec::default();
        let load = load_host_dataset(&codec, &mut BrokenStore, "forest", &template(1), &DatasetReconciler::new(1));
        assert!(matches!(
            load.source,
            LoadSource::TemplateFallback(FallbackReason::Unreadable(_))
        ));
        assert!(!load.persisted);
        assert_eq!(load.dataset, template(1));
    }
}
