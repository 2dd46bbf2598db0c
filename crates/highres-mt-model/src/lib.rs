//! # HighRes-MT
//!
//! A multi-task HighRes3DNet for 3D segmentation with learned categorical
//! group convolutions (stochastic filter groups), built using the Burn deep
//! learning framework.
//!
//! ## Modules
//!
//! - `config`: configuration structures for the model, its layer table, the
//!   categorical grouping and the temperature schedule.
//! - `error`: the custom error types used throughout the crate.
//! - `layers`: convolutional layers, residual blocks and the grouped convolution.
//! - `network`: the `HighResMtNet` model.
//! - `training`: batch and output structures shared with the training loop.
//!
//! ## Key Components
//!
//! - `HighResMtNet`: The main model struct.
//! - `ModelConfig`: The primary configuration struct that drives the model's construction.
//! - `ModelError`: The enum for all possible errors.

mod config;
mod error;
mod layers;
mod network;
pub mod training;

#[doc(inline)]
pub use config::{
    Activation, AnnealingConfig, CategoricalConfig, ConvSpec, GroupConnection, LayerSpecs,
    ModelConfig, ResidualSpec, Stream,
};
#[doc(inline)]
pub use error::{ModelError, ModelResult};
#[doc(inline)]
pub use layers::{
    constant_assignment, gumbel_softmax_decay, same_padding, ActivationLayer,
    CategoricalSampling, ConvolutionalLayer, ConvolutionalLayerConfig, GroupedConvOutput,
    GroupedFlow, HighResBlock, HighResBlockConfig, LearnedCategoricalGroupConv,
    LearnedCategoricalGroupConvConfig, NUM_GROUPS,
};
#[doc(inline)]
pub use network::{
    HighResMtNet, HighResMtNetConfig, HighResMtNetRecord, HighResMtOutput, LayerOutput,
};
#[doc(inline)]
pub use training::{MultiTaskBatch, MultiTaskOutput};

#[cfg(test)]
mod tests {
    use burn::backend::{ndarray::NdArray, Autodiff};

    pub type TestBackend = NdArray<f32>;

    pub type TestAutodiffBackend = Autodiff<TestBackend>;
}
