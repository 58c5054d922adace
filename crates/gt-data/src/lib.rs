//! Dataset sources, the download lock and batched loading.

pub mod loader;
pub mod lock;
pub mod source;

pub use loader::*;
pub use lock::*;
pub use source::*;

pub use burn::data::dataset::vision::MnistItem;
