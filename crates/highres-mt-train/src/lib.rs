//! Training data for HighRes-MT.
//!
//! Provides an in-memory dataset of 3D volumes with two label maps, a
//! batcher producing [`highres_mt_model::MultiTaskBatch`] and a seeded
//! generator of synthetic two-task volumes.

pub mod dataset;
mod error;
mod synthetic;

#[doc(inline)]
pub use dataset::{InMemoryVolumeDataset, MultiTaskBatcher, VolumeItem};
#[doc(inline)]
pub use error::{DatasetError, DatasetResult};
#[doc(inline)]
pub use synthetic::SyntheticVolumeConfig;
