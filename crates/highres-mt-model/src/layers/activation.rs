use burn::{
    nn::{PRelu, PReluConfig, Relu},
    prelude::*,
};
use highres_mt_extra_ops::Identity;

use crate::config::Activation;

/// Activation module selected by [`Activation`].
#[derive(Module, Debug)]
pub enum ActivationLayer<B: Backend> {
    PRelu(PRelu<B>),
    Relu(Relu),
    Identity(Identity<B>),
}

impl Activation {
    /// Build the activation module on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ActivationLayer<B> {
        match self {
            Self::PRelu => ActivationLayer::PRelu(PReluConfig::new().init(device)),
            Self::Relu => ActivationLayer::Relu(Relu::new()),
            Self::None => ActivationLayer::Identity(Identity::new()),
        }
    }
}

impl<B: Backend> ActivationLayer<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::PRelu(prelu) => prelu.forward(x),
            Self::Relu(relu) => relu.forward(x),
            Self::Identity(identity) => identity.forward(x),
        }
    }
}
