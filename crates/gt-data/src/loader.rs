use std::sync::Arc;

use burn::data::dataset::vision::MnistItem;
use burn::data::dataset::Dataset;
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use crate::source::IMAGE_SIZE;

pub const BATCH_SIZE: usize = 64;

/// Per-pixel mean and standard deviation of the MNIST training set, after
/// scaling to [0, 1].
pub const MNIST_MEAN: f32 = 0.1307;
pub const MNIST_STD: f32 = 0.3081;

/// One mini-batch: `[batch, 1, 28, 28]` normalized images and their labels.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Restartable batched view of one dataset split.
///
/// Each call to [`BatchLoader::batches`] starts a new traversal. A shuffled
/// loader draws a fresh permutation per traversal from its seeded RNG.
pub struct BatchLoader {
    dataset: Arc<dyn Dataset<MnistItem>>,
    batch_size: usize,
    rng: Option<ChaCha8Rng>,
}

impl BatchLoader {
    /// Dataset order, every traversal.
    pub fn sequential(dataset: Arc<dyn Dataset<MnistItem>>, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            rng: None,
        }
    }

    /// New random order on every traversal.
    pub fn shuffled(dataset: Arc<dyn Dataset<MnistItem>>, batch_size: usize, seed: u64) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            rng: Some(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn num_items(&self) -> usize {
        self.dataset.len()
    }

    pub fn num_batches(&self) -> usize {
        self.num_items().div_ceil(self.batch_size)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batches<B: Backend>(&mut self, device: &B::Device) -> Batches<B> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(rng) = self.rng.as_mut() {
            order.shuffle(rng);
        }
        Batches {
            dataset: Arc::clone(&self.dataset),
            order,
            batch_size: self.batch_size,
            position: 0,
            device: device.clone(),
        }
    }
}

/// One traversal of a [`BatchLoader`].
pub struct Batches<B: Backend> {
    dataset: Arc<dyn Dataset<MnistItem>>,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
    device: B::Device,
}

impl<B: Backend> Iterator for Batches<B> {
    type Item = Batch<B>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let mut items = Vec::with_capacity(end - self.position);
        for &index in &self.order[self.position..end] {
            match self.dataset.get(index) {
                Some(item) => items.push(item),
                None => warn!(
                    "Dataset has no item at index {} of {}; skipped",
                    index,
                    self.order.len()
                ),
            }
        }
        self.position = end;

        Some(to_batch(&items, &self.device))
    }
}

/// Stack items into normalized image and label tensors.
pub fn to_batch<B: Backend>(items: &[MnistItem], device: &B::Device) -> Batch<B> {
    let n = items.len();
    let mut pixels = Vec::with_capacity(n * IMAGE_SIZE * IMAGE_SIZE);
    for item in items {
        for row in item.image.iter() {
            pixels.extend(row.iter().map(|p| (p / 255.0 - MNIST_MEAN) / MNIST_STD));
        }
    }
    let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();

    let images = Tensor::<B, 4>::from_data(
        TensorData::new(pixels, [n, 1, IMAGE_SIZE, IMAGE_SIZE]),
        device,
    );
    let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [n]), device);

    Batch { images, targets }
}
