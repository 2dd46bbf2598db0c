use burn::{
    nn::{
        conv::{Conv3d, Conv3dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig3d,
    },
    prelude::*,
};

use super::activation::ActivationLayer;
use crate::config::Activation;

/// SAME padding of an odd kernel with the given dilation.
pub const fn same_padding(kernel_size: usize, dilation: usize) -> usize {
    dilation * (kernel_size - 1) / 2
}

/// Stride-1 3D convolution with SAME padding and no bias.
pub fn same_conv3d<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    dilation: usize,
    device: &B::Device,
) -> Conv3d<B> {
    let padding = same_padding(kernel_size, dilation);

    Conv3dConfig::new([in_channels, out_channels], [kernel_size; 3])
        .with_dilation([dilation; 3])
        .with_padding(PaddingConfig3d::Explicit(padding, padding, padding))
        .with_bias(false)
        .init(device)
}

#[derive(Config, Debug)]
pub struct ConvolutionalLayerConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 1)]
    pub dilation: usize,
    #[config(default = true)]
    pub with_bn: bool,
    #[config(default = "Activation::PRelu")]
    pub acti_func: Activation,
}

impl ConvolutionalLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvolutionalLayer<B> {
        let bn = self
            .with_bn
            .then(|| BatchNormConfig::new(self.out_channels).init(device));

        ConvolutionalLayer {
            conv: same_conv3d(
                self.in_channels,
                self.out_channels,
                self.kernel_size,
                self.dilation,
                device,
            ),
            bn,
            activation: self.acti_func.init(device),
        }
    }
}

/// Convolution followed by optional batch normalisation and an activation.
#[derive(Module, Debug)]
pub struct ConvolutionalLayer<B: Backend> {
    conv: Conv3d<B>,
    bn: Option<BatchNorm<B, 3>>,
    activation: ActivationLayer<B>,
}

impl<B: Backend> ConvolutionalLayer<B> {
    /// # Shapes
    ///
    /// - x: `[batch_size, in_channels, depth, height, width]`
    /// - output: `[batch_size, out_channels, depth, height, width]`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.conv.forward(x);
        let x = match &self.bn {
            Some(bn) => bn.forward(x),
            None => x,
        };

        self.activation.forward(x)
    }

    pub fn out_channels(&self) -> usize {
        self.conv.weight.val().dims()[0]
    }
}
