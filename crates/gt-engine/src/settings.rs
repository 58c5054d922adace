//! Run-time settings: where the data comes from and how big each pass is.
//!
//! Resolved in layers: defaults, then an optional JSON file, then the
//! `GRIDTUNE_*` environment variables, then command-line flags.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use gt_data::{DataSource, MnistSource, SyntheticConfig, SyntheticSource};
use gt_types::{config_error, GtError, GtResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::training::LoopSettings;

pub const LOCK_PATH_ENV: &str = "GRIDTUNE_LOCK_PATH";
pub const DATA_SOURCE_ENV: &str = "GRIDTUNE_DATA_SOURCE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    #[default]
    Mnist,
    Synthetic,
}

impl FromStr for DataSourceKind {
    type Err = GtError;

    fn from_str(s: &str) -> GtResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mnist" => Ok(Self::Mnist),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(config_error!(
                "Unknown data source '{}' (expected mnist or synthetic)",
                other
            )),
        }
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mnist => write!(f, "mnist"),
            Self::Synthetic => write!(f, "synthetic"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    #[serde(default)]
    pub data_source: DataSourceKind,

    /// Lock file guarding the dataset download. `None` uses the per-user
    /// default.
    #[serde(default)]
    pub lock_path: Option<PathBuf>,

    #[serde(default, rename = "loop")]
    pub loop_settings: LoopSettings,

    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

impl RunSettings {
    /// Read settings from a JSON file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> GtResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_error!("Cannot read settings {}: {}", path.display(), e))?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        debug!("Loaded run settings from {}", path.display());
        Ok(settings)
    }

    /// Apply `GRIDTUNE_LOCK_PATH` and `GRIDTUNE_DATA_SOURCE` if set.
    pub fn with_env(self) -> GtResult<Self> {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> GtResult<Self> {
        if let Some(path) = var(LOCK_PATH_ENV).filter(|p| !p.is_empty()) {
            self.lock_path = Some(PathBuf::from(path));
        }
        if let Some(kind) = var(DATA_SOURCE_ENV).filter(|k| !k.is_empty()) {
            self.data_source = kind.parse()?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> GtResult<()> {
        let l = &self.loop_settings;
        if l.batch_size == 0 {
            return Err(config_error!("batch_size must be at least 1"));
        }
        if l.train_cap == 0 || l.eval_cap == 0 {
            return Err(config_error!("example caps must be at least 1"));
        }
        Ok(())
    }

    pub fn lock_path(&self) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(MnistSource::default_lock_path)
    }

    pub fn build_source(&self) -> Arc<dyn DataSource> {
        match self.data_source {
            DataSourceKind::Mnist => Arc::new(MnistSource::new(self.lock_path())),
            DataSourceKind::Synthetic => Arc::new(SyntheticSource::new(self.synthetic.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn parses_data_source_kind() {
        assert_eq!("MNIST".parse::<DataSourceKind>().unwrap(), DataSourceKind::Mnist);
        assert_eq!(
            " synthetic ".parse::<DataSourceKind>().unwrap(),
            DataSourceKind::Synthetic
        );
        assert!(matches!(
            "cifar".parse::<DataSourceKind>(),
            Err(GtError::Config(_))
        ));
    }

    #[test]
    fn loads_partial_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"data_source": "synthetic", "loop": {{"train_cap": 128}}, "synthetic": {{"train_size": 10, "test_size": 5, "seed": 1, "noise": 0.1}}}}"#
        )
        .unwrap();

        let settings = RunSettings::load(file.path()).unwrap();
        assert_eq!(settings.data_source, DataSourceKind::Synthetic);
        assert_eq!(settings.loop_settings.train_cap, 128);
        assert_eq!(settings.loop_settings.batch_size, 64);
        assert_eq!(settings.loop_settings.eval_cap, 256);
        assert_eq!(settings.synthetic.train_size, 10);
        assert_eq!(settings.build_source().name(), "synthetic");
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"loop": {{"batch_size": 0}}}}"#).unwrap();
        assert!(matches!(
            RunSettings::load(file.path()),
            Err(GtError::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RunSettings::load(dir.path().join("absent.json")),
            Err(GtError::Config(_))
        ));
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            (LOCK_PATH_ENV, "/tmp/gridtune-test.lock"),
            (DATA_SOURCE_ENV, "synthetic"),
        ]
        .into_iter()
        .collect();

        let settings = RunSettings::default()
            .with_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.data_source, DataSourceKind::Synthetic);
        assert_eq!(
            settings.lock_path(),
            PathBuf::from("/tmp/gridtune-test.lock")
        );

        let bad = RunSettings::default().with_vars(|k| {
            (k == DATA_SOURCE_ENV).then(|| "imagenet".to_string())
        });
        assert!(bad.is_err());
    }

    #[test]
    fn default_lock_path_is_per_user() {
        let settings = RunSettings::default();
        assert!(settings.lock_path().ends_with("gridtune/mnist.lock"));
        assert_eq!(settings.build_source().name(), "mnist");
    }
}
