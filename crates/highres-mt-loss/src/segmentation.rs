//! Multi-scale, multi-batch segmentation loss.
//!
//! [`SegmentationLoss`] compares one or more prediction scales against a shared
//! ground truth. Each batch element is reshaped to a voxel-major layout and
//! scored independently by the configured [`LossType`]; element losses are
//! averaged over the batch, and scale losses are averaged over the scales.

use burn::{module::Ignored, prelude::*, tensor::activation::softmax};

use crate::{
    error::{LossError, LossResult},
    loss_type::{LossParams, LossType},
    voxel::{spatial_voxels, squeeze_voxel_map, to_voxel_major, VoxelBatch, VoxelTarget},
};

/// Configuration for the [segmentation loss](SegmentationLoss).
#[derive(Config, Debug)]
pub struct SegmentationLossConfig {
    /// Number of segmentation classes; prediction channel count.
    pub num_classes: usize,
    #[config(default = "LossType::ScaledApproxSoftmax")]
    pub loss_type: LossType,
    /// Extra parameters forwarded to the per-voxel loss.
    #[config(default = "LossParams::new()")]
    pub loss_params: LossParams,
    /// Apply a softmax over classes before the per-voxel loss. Ignored for loss
    /// types that consume logits.
    #[config(default = true)]
    pub softmax: bool,
}

impl SegmentationLossConfig {
    /// Initialize a new [segmentation loss](SegmentationLoss).
    ///
    /// # Errors
    ///
    /// Returns [`LossError::InvalidParameter`] if `num_classes` is zero or a
    /// loss parameter is out of range.
    pub fn init<B: Backend>(&self) -> LossResult<SegmentationLoss<B>> {
        self.validate()?;

        let softmax = if self.loss_type.consumes_logits() {
            tracing::info!(
                loss = self.loss_type.name(),
                "cross entropy loss applies a softmax internally; explicit softmax disabled"
            );
            false
        } else {
            self.softmax
        };

        Ok(SegmentationLoss {
            num_classes: self.num_classes,
            softmax,
            loss_type: Ignored(self.loss_type.clone()),
            loss_params: Ignored(self.loss_params.clone()),
            _phantom: std::marker::PhantomData,
        })
    }

    /// Check the configuration without building the loss.
    ///
    /// # Errors
    ///
    /// See [`SegmentationLossConfig::init`].
    pub fn validate(&self) -> LossResult<()> {
        if self.num_classes == 0 {
            return Err(LossError::InvalidParameter {
                parameter: "num_classes".to_string(),
                reason: "Number of classes for segmentation loss should be positive.".to_string(),
            });
        }

        let params = &self.loss_params;
        if params.epsilon < 0.0 {
            return Err(LossError::InvalidParameter {
                parameter: "epsilon".to_string(),
                reason: format!("must be non-negative, got {}", params.epsilon),
            });
        }
        if !(0.0..=1.0).contains(&params.sensitivity_weight) {
            return Err(LossError::InvalidParameter {
                parameter: "sensitivity_weight".to_string(),
                reason: format!("must lie in [0, 1], got {}", params.sensitivity_weight),
            });
        }
        if params.tversky_alpha < 0.0 || params.tversky_beta < 0.0 {
            return Err(LossError::InvalidParameter {
                parameter: "tversky_alpha/tversky_beta".to_string(),
                reason: format!(
                    "must be non-negative, got alpha={} beta={}",
                    params.tversky_alpha, params.tversky_beta
                ),
            });
        }

        Ok(())
    }
}

/// Segmentation loss averaged over batch elements and prediction scales.
#[derive(Module, Debug)]
pub struct SegmentationLoss<B: Backend> {
    num_classes: usize,
    softmax: bool,
    loss_type: Ignored<LossType>,
    loss_params: Ignored<LossParams>,
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> SegmentationLoss<B> {
    /// Number of classes the loss expects.
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Whether a softmax is applied to predictions before the per-voxel loss.
    pub const fn applies_softmax(&self) -> bool {
        self.softmax
    }

    /// The configured per-voxel loss.
    pub fn loss_type(&self) -> &LossType {
        &self.loss_type.0
    }

    /// Loss of a single prediction scale.
    ///
    /// # Errors
    ///
    /// See [`SegmentationLoss::forward`].
    pub fn forward_single<const D: usize>(
        &self,
        prediction: Tensor<B, D>,
        ground_truth: Tensor<B, D>,
        noise: Option<Tensor<B, D>>,
        weight_map: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        self.forward(vec![prediction], ground_truth, noise, weight_map)
    }

    /// Compute the loss of every prediction scale against the same ground truth.
    ///
    /// # Shapes
    ///
    /// - predictions: each `[batch_size, num_classes, spatial...]`
    /// - ground_truth: `[batch_size, 1 | num_classes, spatial...]`
    /// - noise: `[batch_size, 1, spatial...]`, per-voxel log-variance
    /// - weight_map: `[batch_size, 1, spatial...]`
    /// - output: `[1]`
    ///
    /// # Errors
    ///
    /// Returns [`LossError::EmptyPredictions`] for an empty list,
    /// [`LossError::DimensionMismatch`] when batch size, channel count or voxel
    /// count disagree or the batch holds no voxels, and
    /// [`LossError::LabelOutOfRange`] for invalid labels.
    pub fn forward<const D: usize>(
        &self,
        predictions: Vec<Tensor<B, D>>,
        ground_truth: Tensor<B, D>,
        noise: Option<Tensor<B, D>>,
        weight_map: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        if predictions.is_empty() {
            return Err(LossError::EmptyPredictions);
        }

        let num_scales = predictions.len();
        let mut scale_losses = Vec::with_capacity(num_scales);
        for (scale, prediction) in predictions.into_iter().enumerate() {
            let loss = self.scale_loss(
                prediction,
                ground_truth.clone(),
                noise.clone(),
                weight_map.clone(),
            )?;
            tracing::trace!(scale, "segmentation loss computed for scale");
            scale_losses.push(loss);
        }

        Ok(Tensor::cat(scale_losses, 0).mean())
    }

    /// Loss of one scale, averaged over the batch.
    fn scale_loss<const D: usize>(
        &self,
        prediction: Tensor<B, D>,
        ground_truth: Tensor<B, D>,
        noise: Option<Tensor<B, D>>,
        weight_map: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let pred_dims = prediction.dims();
        let batch_size = pred_dims[0];
        if D < 3 {
            return Err(LossError::DimensionMismatch {
                tensor: "prediction".to_string(),
                expected: "[batch_size, num_classes, spatial...]".to_string(),
                actual: format!("{pred_dims:?}"),
            });
        }
        if pred_dims[1] != self.num_classes {
            return Err(LossError::DimensionMismatch {
                tensor: "prediction".to_string(),
                expected: format!("{} channels", self.num_classes),
                actual: format!("{pred_dims:?}"),
            });
        }
        let n_voxels = spatial_voxels(&pred_dims);
        if batch_size == 0 || n_voxels == 0 {
            return Err(LossError::DimensionMismatch {
                tensor: "prediction".to_string(),
                expected: "a non-empty batch with at least one voxel".to_string(),
                actual: format!("{pred_dims:?}"),
            });
        }
        self.check_batch("ground_truth", &ground_truth, batch_size)?;
        if let Some(noise) = &noise {
            self.check_batch("noise", noise, batch_size)?;
        }
        if let Some(weight_map) = &weight_map {
            self.check_batch("weight_map", weight_map, batch_size)?;
        }

        let mut batch_losses = Vec::with_capacity(batch_size);
        for index in 0..batch_size {
            let element = self.voxel_batch(
                prediction.clone().narrow(0, index, 1),
                ground_truth.clone().narrow(0, index, 1),
                noise.clone().map(|noise| noise.narrow(0, index, 1)),
                weight_map.clone().map(|weight| weight.narrow(0, index, 1)),
                n_voxels,
            )?;
            element.check_labels()?;

            batch_losses.push(self.loss_type.0.compute(&element, &self.loss_params.0));
        }

        Ok(Tensor::cat(batch_losses, 0).mean())
    }

    fn check_batch<const D: usize>(
        &self,
        name: &str,
        tensor: &Tensor<B, D>,
        batch_size: usize,
    ) -> LossResult<()> {
        let dims = tensor.dims();
        if dims[0] != batch_size {
            return Err(LossError::DimensionMismatch {
                tensor: name.to_string(),
                expected: format!("batch size {batch_size}"),
                actual: format!("{dims:?}"),
            });
        }

        Ok(())
    }

    /// Reshape one batch element into the per-voxel layout.
    fn voxel_batch<const D: usize>(
        &self,
        prediction: Tensor<B, D>,
        ground_truth: Tensor<B, D>,
        noise: Option<Tensor<B, D>>,
        weight_map: Option<Tensor<B, D>>,
        n_voxels: usize,
    ) -> LossResult<VoxelBatch<B>> {
        let prediction = to_voxel_major(prediction);
        let prediction = if self.softmax {
            softmax(prediction, 1)
        } else {
            prediction
        };

        let gt_numel = ground_truth.shape().num_elements();
        if gt_numel % n_voxels != 0 {
            return Err(LossError::DimensionMismatch {
                tensor: "ground_truth".to_string(),
                expected: format!("a multiple of {n_voxels} values"),
                actual: format!("{:?}", ground_truth.dims()),
            });
        }
        let gt_channels = gt_numel / n_voxels;
        let ground_truth = match gt_channels {
            1 => VoxelTarget::Labels(ground_truth.reshape([n_voxels])),
            channels if channels == self.num_classes => {
                VoxelTarget::Dense(to_voxel_major(ground_truth))
            }
            channels => {
                return Err(LossError::DimensionMismatch {
                    tensor: "ground_truth".to_string(),
                    expected: format!("1 or {} channels", self.num_classes),
                    actual: format!("{channels} channels"),
                })
            }
        };

        let noise = noise
            .map(|noise| squeeze_voxel_map("noise", noise, n_voxels))
            .transpose()?;
        let weight = weight_map
            .map(|weight| squeeze_voxel_map("weight_map", weight, n_voxels))
            .transpose()?;

        Ok(VoxelBatch {
            prediction,
            ground_truth,
            noise,
            weight,
        })
    }
}
