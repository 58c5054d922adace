use std::sync::{Mutex, PoisonError};

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;
use burn::tensor::activation::log_softmax;

use gt_data::{IMAGE_SIZE, NUM_CLASSES};

const CONV_CHANNELS: usize = 3;
const KERNEL_SIZE: usize = 3;
const POOL_SIZE: usize = 3;
/// 3 channels of 8x8 after conv (28 -> 26) and pooling (26 -> 8).
pub const FLATTENED: usize = 192;

/// The backend RNG is process-wide; seeding and initialization must not
/// interleave across threads.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// conv(1 -> 3, 3x3) -> max-pool(3) -> relu -> flatten -> linear(192 -> 10)
/// -> log-softmax.
#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
    activation: Relu,
    fc: Linear<B>,
}

impl<B: Backend> ConvNet<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([1, CONV_CHANNELS], [KERNEL_SIZE, KERNEL_SIZE]).init(device),
            pool: MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
                .with_strides([POOL_SIZE, POOL_SIZE])
                .init(),
            activation: Relu::new(),
            fc: LinearConfig::new(FLATTENED, NUM_CLASSES).init(device),
        }
    }

    /// Same weights for the same seed, whatever other threads are doing.
    ///
    /// Parameters are materialized on first use, so one forward pass runs
    /// while the lock is held.
    pub fn seeded(device: &B::Device, seed: u64) -> Self {
        let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        B::seed(seed);
        let model = Self::new(device);
        let _ = model.forward(Tensor::zeros([1, 1, IMAGE_SIZE, IMAGE_SIZE], device));
        model
    }

    /// `[batch, 1, 28, 28]` images to `[batch, 10]` log-probabilities.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv.forward(images);
        let x = self.pool.forward(x);
        let x = self.activation.forward(x);

        let [batch, channels, height, width] = x.dims();
        let x = x.reshape([batch, channels * height * width]);

        log_softmax(self.fc.forward(x), 1)
    }
}
