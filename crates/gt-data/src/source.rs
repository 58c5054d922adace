use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataset::vision::{MnistDataset, MnistItem};
use burn::data::dataset::{Dataset, InMemDataset};
use gt_types::{DataError, GtResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::lock::DatasetLock;

pub const IMAGE_SIZE: usize = 28;
pub const NUM_CLASSES: usize = 10;

/// Training and evaluation sequences for one trial. Read-only once loaded.
#[derive(Clone)]
pub struct DatasetSplit {
    pub train: Arc<dyn Dataset<MnistItem>>,
    pub test: Arc<dyn Dataset<MnistItem>>,
}

impl DatasetSplit {
    pub fn new(train: Vec<MnistItem>, test: Vec<MnistItem>) -> Self {
        Self {
            train: Arc::new(InMemDataset::new(train)),
            test: Arc::new(InMemDataset::new(test)),
        }
    }
}

impl std::fmt::Debug for DatasetSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetSplit")
            .field("train", &self.train.len())
            .field("test", &self.test.len())
            .finish()
    }
}

/// Where a trial gets its images from.
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self) -> GtResult<DatasetSplit>;
}

/// MNIST handwritten digits, downloaded once into the user cache directory.
#[derive(Debug, Clone)]
pub struct MnistSource {
    lock_path: PathBuf,
}

impl MnistSource {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
        }
    }

    pub fn default_lock_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gridtune")
            .join("mnist.lock")
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Default for MnistSource {
    fn default() -> Self {
        Self::new(Self::default_lock_path())
    }
}

impl DataSource for MnistSource {
    fn name(&self) -> &str {
        "mnist"
    }

    fn load(&self) -> GtResult<DatasetSplit> {
        let _guard = DatasetLock::acquire(&self.lock_path)?;
        info!("Loading MNIST (lock {})", self.lock_path.display());

        // The dataset constructors download on first use and panic when the
        // download or the read fails.
        let loaded = std::panic::catch_unwind(|| (MnistDataset::train(), MnistDataset::test()));
        let (train, test) = loaded.map_err(|panic| DataError::LoadingFailed {
            message: panic_message(panic.as_ref()),
        })?;

        if train.is_empty() {
            return Err(DataError::EmptySplit {
                split: "train".to_string(),
            }
            .into());
        }
        if test.is_empty() {
            return Err(DataError::EmptySplit {
                split: "test".to_string(),
            }
            .into());
        }

        info!(
            "Loaded MNIST: {} training, {} test images",
            train.len(),
            test.len()
        );
        Ok(DatasetSplit {
            train: Arc::new(train),
            test: Arc::new(test),
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "dataset loading panicked".to_string()
    }
}

/// Settings for [`SyntheticSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub train_size: usize,
    pub test_size: usize,
    pub seed: u64,
    /// Maximum background noise, as a fraction of full intensity.
    pub noise: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            train_size: 2048,
            test_size: 512,
            seed: 7,
            noise: 0.3,
        }
    }
}

/// Deterministic in-memory digits: the label is drawn as a bright horizontal
/// band whose row depends on the label, over uniform noise.
#[derive(Debug, Clone, Default)]
pub struct SyntheticSource {
    config: SyntheticConfig,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    pub fn generate(size: usize, seed: u64, noise: f32) -> Vec<MnistItem> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..size)
            .map(|_| {
                let label = rng.random_range(0..NUM_CLASSES);
                let mut image = [[0.0f32; IMAGE_SIZE]; IMAGE_SIZE];
                for row in image.iter_mut() {
                    for pixel in row.iter_mut() {
                        *pixel = rng.random::<f32>() * noise * 255.0;
                    }
                }
                let band = 2 + 2 * label;
                for row in &mut image[band..band + 2] {
                    for pixel in &mut row[4..IMAGE_SIZE - 4] {
                        *pixel = 255.0;
                    }
                }
                MnistItem {
                    image,
                    label: label as u8,
                }
            })
            .collect()
    }
}

impl DataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn load(&self) -> GtResult<DatasetSplit> {
        let c = &self.config;
        if c.train_size == 0 || c.test_size == 0 {
            return Err(DataError::EmptySplit {
                split: (if c.train_size == 0 { "train" } else { "test" }).to_string(),
            }
            .into());
        }
        let train = Self::generate(c.train_size, c.seed, c.noise);
        let test = Self::generate(c.test_size, c.seed.wrapping_add(1), c.noise);
        Ok(DatasetSplit::new(train, test))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_is_deterministic() {
        let a = SyntheticSource::generate(32, 3, 0.2);
        let b = SyntheticSource::generate(32, 3, 0.2);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.label, y.label);
            assert_eq!(x.image, y.image);
        }
    }

    #[test]
    fn synthetic_labels_and_band() {
        let items = SyntheticSource::generate(200, 11, 0.1);
        for item in &items {
            assert!((item.label as usize) < NUM_CLASSES);
            let band = 2 + 2 * item.label as usize;
            assert_eq!(item.image[band][10], 255.0);
            assert_eq!(item.image[band + 1][10], 255.0);
            assert!(item.image[0][0] <= 0.1 * 255.0);
        }
    }

    #[test]
    fn synthetic_source_loads_split() {
        let source = SyntheticSource::new(SyntheticConfig {
            train_size: 100,
            test_size: 40,
            seed: 1,
            noise: 0.3,
        });
        let split = source.load().unwrap();
        assert_eq!(split.train.len(), 100);
        assert_eq!(split.test.len(), 40);
        assert_eq!(source.name(), "synthetic");
        assert_eq!(format!("{split:?}"), "DatasetSplit { train: 100, test: 40 }");
    }

    #[test]
    fn synthetic_rejects_empty_split() {
        let source = SyntheticSource::new(SyntheticConfig {
            train_size: 0,
            ..SyntheticConfig::default()
        });
        assert!(source.load().is_err());
    }

    #[test]
    fn panic_message_extracts_text() {
        let boxed: Box<dyn Any + Send> = Box::new("network down");
        assert_eq!(panic_message(boxed.as_ref()), "network down");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bad checksum"));
        assert_eq!(panic_message(boxed.as_ref()), "bad checksum");
    }
}
