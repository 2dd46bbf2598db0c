//! Configuration module for HighRes-MT.
//!
//! - `core`: the main configuration structures and their validation
//! - `enums`: enumeration types used in configurations

mod core;
mod enums;

pub use self::core::{
    AnnealingConfig, CategoricalConfig, ConvSpec, LayerSpecs, ModelConfig, ResidualSpec,
};

pub use enums::{Activation, GroupConnection, Stream};
