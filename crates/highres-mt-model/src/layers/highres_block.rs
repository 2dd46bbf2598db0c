//! Pre-activation residual block of HighRes3DNet.

use burn::{
    nn::{conv::Conv3d, BatchNorm, BatchNormConfig},
    prelude::*,
};

use super::{activation::ActivationLayer, conv::same_conv3d};
use crate::config::Activation;

#[derive(Config, Debug)]
pub struct HighResBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// One convolution per entry.
    #[config(default = "vec![3, 3]")]
    pub kernels: Vec<usize>,
    #[config(default = 1)]
    pub dilation: usize,
    #[config(default = "Activation::PRelu")]
    pub acti_func: Activation,
    /// Add the block input to its output.
    #[config(default = true)]
    pub with_res: bool,
}

impl HighResBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> HighResBlock<B> {
        let units = self
            .kernels
            .iter()
            .enumerate()
            .map(|(i, &kernel_size)| {
                let in_channels = if i == 0 {
                    self.in_channels
                } else {
                    self.out_channels
                };
                PreActivationConv {
                    bn: BatchNormConfig::new(in_channels).init(device),
                    activation: self.acti_func.init(device),
                    conv: same_conv3d(
                        in_channels,
                        self.out_channels,
                        kernel_size,
                        self.dilation,
                        device,
                    ),
                }
            })
            .collect();

        let projection = (self.with_res && self.in_channels > self.out_channels)
            .then(|| same_conv3d(self.in_channels, self.out_channels, 1, 1, device));

        HighResBlock {
            units,
            projection,
            with_res: self.with_res,
            out_channels: self.out_channels,
        }
    }
}

/// Batch norm, activation, then a dilated convolution.
#[derive(Module, Debug)]
pub struct PreActivationConv<B: Backend> {
    bn: BatchNorm<B, 3>,
    activation: ActivationLayer<B>,
    conv: Conv3d<B>,
}

impl<B: Backend> PreActivationConv<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.bn.forward(x);
        let x = self.activation.forward(x);
        self.conv.forward(x)
    }
}

/// Residual block: a chain of [`PreActivationConv`] units plus an
/// element-wise sum with the input.
///
/// When the input has fewer channels than the output it is zero-padded along
/// the channel axis; when it has more, it is projected by a 1x1x1 convolution.
#[derive(Module, Debug)]
pub struct HighResBlock<B: Backend> {
    units: Vec<PreActivationConv<B>>,
    projection: Option<Conv3d<B>>,
    with_res: bool,
    out_channels: usize,
}

impl<B: Backend> HighResBlock<B> {
    /// # Shapes
    ///
    /// - x: `[batch_size, in_channels, depth, height, width]`
    /// - output: `[batch_size, out_channels, depth, height, width]`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let output = self
            .units
            .iter()
            .fold(x.clone(), |flow, unit| unit.forward(flow));

        if self.with_res {
            output + self.bypass(x)
        } else {
            output
        }
    }

    /// Match the channel count of the residual input to the block output.
    fn bypass(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        if let Some(projection) = &self.projection {
            return projection.forward(x);
        }

        let [batch, channels, depth, height, width] = x.dims();
        if channels >= self.out_channels {
            return x;
        }

        let padding = Tensor::zeros(
            [batch, self.out_channels - channels, depth, height, width],
            &x.device(),
        );
        Tensor::cat(vec![x, padding], 1)
    }

    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn num_units(&self) -> usize {
        self.units.len()
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Distribution, TensorData};

    use super::*;
    use crate::tests::TestBackend;

    fn volume(channels: usize) -> Tensor<TestBackend, 5> {
        Tensor::random(
            [2, channels, 8, 8, 8],
            Distribution::Normal(0.0, 1.0),
            &Default::default(),
        )
    }

    #[test]
    fn block_keeps_shape_with_dilation() {
        let device = Default::default();
        let block = HighResBlockConfig::new(4, 4)
            .with_dilation(4)
            .init::<TestBackend>(&device);

        let y = block.forward(volume(4));

        assert_eq!(y.dims(), [2, 4, 8, 8, 8]);
        assert_eq!(block.num_units(), 2);
    }

    #[test]
    fn widening_block_zero_pads_bypass() {
        let device = Default::default();
        let block = HighResBlockConfig::new(2, 5).init::<TestBackend>(&device);
        assert!(block.projection.is_none());

        let x = volume(2);
        let padded = block.bypass(x.clone());

        assert_eq!(padded.dims(), [2, 5, 8, 8, 8]);
        padded
            .clone()
            .narrow(1, 0, 2)
            .into_data()
            .assert_eq(&x.into_data(), true);
        let tail = padded.narrow(1, 2, 3).abs().sum().into_data();
        tail.assert_eq(&TensorData::from([0.0f32]), false);

        assert_eq!(block.forward(volume(2)).dims(), [2, 5, 8, 8, 8]);
    }

    #[test]
    fn narrowing_block_projects_bypass() {
        let device = Default::default();
        let block = HighResBlockConfig::new(6, 3).init::<TestBackend>(&device);

        assert!(block.projection.is_some());
        assert_eq!(block.forward(volume(6)).dims(), [2, 3, 8, 8, 8]);
    }

    #[test]
    fn block_without_residual_skips_bypass() {
        let device = Default::default();
        let block = HighResBlockConfig::new(6, 3)
            .with_with_res(false)
            .with_kernels(vec![1])
            .init::<TestBackend>(&device);

        assert!(block.projection.is_none());
        assert_eq!(block.forward(volume(6)).dims(), [2, 3, 8, 8, 8]);
    }
}
