use std::path::Path;

use groundcover_stream::{GridConfig, StreamConfig};
use groundcover_transfer::TransferConfig;
use serde::{Deserialize, Serialize};

use crate::SessionError;

/// Everything a host or client needs to load and stream a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundcoverConfig {
    pub grid: GridConfig,
    pub stream: StreamConfig,
    pub transfer: TransferConfig,
    /// Datasets saved with an older version are reconciled on load.
    pub dataset_version: u32,
    pub save_key: String,
    pub autosave_interval_ms: u64,
}

impl Default for GroundcoverConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            stream: StreamConfig::default(),
            transfer: TransferConfig::default(),
            dataset_version: 1,
            save_key: "forest".to_string(),
            autosave_interval_ms: 30_000,
        }
    }
}

impl GroundcoverConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, SessionError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String, SessionError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        self.grid
            .validate()
            .map_err(|e| SessionError::Config(e.to_string()))?;
        self.transfer
            .validate()
            .map_err(|e| SessionError::Config(e.to_string()))?;
        if self.stream.refresh_interval_ms == 0 {
            return Err(SessionError::Config("refresh_interval_ms must be positive".into()));
        }
        if self.autosave_interval_ms == 0 {
            return Err(SessionError::Config("autosave_interval_ms must be positive".into()));
        }
        if self.save_key.is_empty() {
            return Err(SessionError::Config("save_key must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundcover_transfer::SegmentPolicy;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = GroundcoverConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, GroundcoverConfig::default());
        assert_eq!(config.stream.pool_budget, 100);
        assert_eq!(config.stream.refresh_interval_ms, 300);
        assert_eq!(config.transfer.resync_every, 6);
    }

    #[test]
    fn partial_yaml_overrides_fields() {
        let yaml = r#"
grid:
  extent: 100.0
  cell_size: 10.0
transfer:
  segment_policy:
    max_segment_bytes: 512
  timeout_ticks: 20
dataset_version: 3
save_key: test_world
"#;
        let config = GroundcoverConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.grid, GridConfig::new(100.0, 10.0));
        assert_eq!(config.transfer.segment_policy, SegmentPolicy::MaxSegmentBytes(512));
        assert_eq!(config.transfer.timeout_ticks, 20);
        assert_eq!(config.transfer.resync_every, 6);
        assert_eq!(config.dataset_version, 3);
        assert_eq!(config.save_key, "test_world");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            GroundcoverConfig::from_yaml_str("grid: { extent: 5.0, cell_size: 10.0 }"),
            Err(SessionError::Config(_))
        ));
        assert!(matches!(
            GroundcoverConfig::from_yaml_str("transfer: { segment_policy: { fixed_count: 0 } }"),
            Err(SessionError::Config(_))
        ));
        assert!(matches!(
            GroundcoverConfig::from_yaml_str("grid: [1, 2]"),
            Err(SessionError::Yaml(_))
        ));
    }

    #[test]
    fn load_from_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("groundcover.yaml");
        let mut config = GroundcoverConfig::default();
        config.dataset_version = 7;
        std::fs::write(&path, config.to_yaml_string().unwrap()).unwrap();
        assert_eq!(GroundcoverConfig::load(&path).unwrap(), config);
    }
}
