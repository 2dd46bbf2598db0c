//! Building blocks of the HighRes-MT network.

mod activation;
mod annealing;
mod conv;
mod grouped_conv;
mod highres_block;

pub use activation::ActivationLayer;
pub use annealing::gumbel_softmax_decay;
pub use conv::{same_padding, ConvolutionalLayer, ConvolutionalLayerConfig};
pub use grouped_conv::{
    constant_assignment, CategoricalSampling, GroupedConvOutput, GroupedFlow,
    LearnedCategoricalGroupConv, LearnedCategoricalGroupConvConfig, NUM_GROUPS,
};
pub use highres_block::{HighResBlock, HighResBlockConfig};
