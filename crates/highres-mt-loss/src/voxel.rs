//! Per-voxel views of a single batch element.
//!
//! Every per-voxel loss function works on the same layout: the prediction is a
//! `[n_voxels, num_classes]` matrix and every other tensor has one row per voxel.
//! This module converts channels-first network tensors into that layout.

use burn::{prelude::*, tensor::ElementConversion};

use crate::error::{LossError, LossResult};

/// Ground truth of one batch element in voxel-major layout.
#[derive(Debug, Clone)]
pub enum VoxelTarget<B: Backend> {
    /// Integer class labels stored as floats, shape `[n_voxels]`.
    Labels(Tensor<B, 1>),
    /// One-hot or soft labels, shape `[n_voxels, num_classes]`.
    Dense(Tensor<B, 2>),
}

/// One batch element prepared for a per-voxel loss function.
#[derive(Debug, Clone)]
pub struct VoxelBatch<B: Backend> {
    /// Class scores, shape `[n_voxels, num_classes]`. Probabilities when the
    /// aggregator applied a softmax, logits otherwise.
    pub prediction: Tensor<B, 2>,
    pub ground_truth: VoxelTarget<B>,
    /// Per-voxel log-variance, shape `[n_voxels]`.
    pub noise: Option<Tensor<B, 1>>,
    /// Per-voxel weight, shape `[n_voxels]`.
    pub weight: Option<Tensor<B, 1>>,
}

impl<B: Backend> VoxelBatch<B> {
    /// Number of voxels in the element.
    pub fn num_voxels(&self) -> usize {
        self.prediction.dims()[0]
    }

    /// Number of classes in the prediction.
    pub fn num_classes(&self) -> usize {
        self.prediction.dims()[1]
    }

    /// Ground truth as a dense `[n_voxels, num_classes]` matrix.
    pub fn dense_target(&self) -> Tensor<B, 2> {
        match &self.ground_truth {
            VoxelTarget::Labels(labels) => one_hot(labels.clone(), self.num_classes()),
            VoxelTarget::Dense(dense) => dense.clone(),
        }
    }

    /// Ground truth as integer labels, shape `[n_voxels]`.
    ///
    /// Dense targets contribute their last channel. Values are truncated
    /// towards zero.
    pub fn label_indices(&self) -> Tensor<B, 1, Int> {
        match &self.ground_truth {
            VoxelTarget::Labels(labels) => labels.clone().int(),
            VoxelTarget::Dense(dense) => {
                let [n_voxels, channels] = dense.dims();
                dense
                    .clone()
                    .slice([0..n_voxels, channels - 1..channels])
                    .reshape([n_voxels])
                    .int()
            }
        }
    }

    /// Reject label values outside `[0, num_classes)`.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::LabelOutOfRange`] for the first offending bound.
    pub fn check_labels(&self) -> LossResult<()> {
        let VoxelTarget::Labels(labels) = &self.ground_truth else {
            return Ok(());
        };
        let num_classes = self.num_classes();

        let min = labels.clone().min().into_scalar().elem::<f64>();
        if min < 0.0 {
            return Err(LossError::LabelOutOfRange {
                label: min,
                num_classes,
            });
        }
        let max = labels.clone().max().into_scalar().elem::<f64>();
        if max.trunc() >= num_classes as f64 {
            return Err(LossError::LabelOutOfRange {
                label: max,
                num_classes,
            });
        }

        Ok(())
    }
}

/// One-hot encode float labels of shape `[n_voxels]` into `[n_voxels, num_classes]`.
pub fn one_hot<B: Backend>(labels: Tensor<B, 1>, num_classes: usize) -> Tensor<B, 2> {
    let [n_voxels] = labels.dims();
    let device = labels.device();

    let labels = labels
        .int()
        .reshape([n_voxels, 1])
        .repeat_dim(1, num_classes);
    let classes = Tensor::<B, 1, Int>::arange(0..num_classes as i64, &device)
        .reshape([1, num_classes])
        .repeat_dim(0, n_voxels);

    labels.equal(classes).float()
}

/// Flatten a channels-first tensor of one batch element into `[n_voxels, channels]`.
///
/// The input has shape `[1, channels, spatial...]`.
pub fn to_voxel_major<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, 2> {
    let dims = tensor.dims();
    let channels = dims[1];
    let n_voxels = dims[2..].iter().product::<usize>();

    tensor.reshape([channels, n_voxels]).transpose()
}

/// Number of voxels of a channels-first tensor, excluding batch and channels.
pub fn spatial_voxels(dims: &[usize]) -> usize {
    dims.iter().skip(2).product()
}

/// Reshape a single-channel auxiliary map (noise or weight) of one element to `[n_voxels]`.
///
/// # Errors
///
/// Returns [`LossError::DimensionMismatch`] when the map does not have exactly
/// one value per prediction voxel.
pub fn squeeze_voxel_map<B: Backend, const D: usize>(
    name: &str,
    tensor: Tensor<B, D>,
    n_voxels: usize,
) -> LossResult<Tensor<B, 1>> {
    let numel = tensor.shape().num_elements();
    if numel != n_voxels {
        return Err(LossError::DimensionMismatch {
            tensor: name.to_string(),
            expected: format!("{n_voxels} values (one per voxel)"),
            actual: format!("{:?}", tensor.dims()),
        });
    }

    Ok(tensor.reshape([n_voxels]))
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn one_hot_encodes_float_labels() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 1>::from_floats([0.0, 2.0, 1.0], &device);

        let encoded = one_hot(labels, 3);

        encoded.into_data().assert_eq(
            &TensorData::from([[1.0f32, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]]),
            false,
        );
    }

    #[test]
    fn to_voxel_major_keeps_channels_per_voxel() {
        let device = Default::default();
        // [1, 2, 1, 1, 3]: channel 0 = 1,2,3 and channel 1 = 10,20,30
        let tensor = Tensor::<TestBackend, 5>::from_floats(
            [[[[[1.0, 2.0, 3.0]]], [[[10.0, 20.0, 30.0]]]]],
            &device,
        );

        let voxels = to_voxel_major(tensor);

        assert_eq!(voxels.dims(), [3, 2]);
        voxels.into_data().assert_eq(
            &TensorData::from([[1.0f32, 10.0], [2.0, 20.0], [3.0, 30.0]]),
            false,
        );
    }

    #[test]
    fn label_indices_from_dense_target_use_last_channel() {
        let device = Default::default();
        let batch = VoxelBatch::<TestBackend> {
            prediction: Tensor::zeros([3, 3], &device),
            ground_truth: VoxelTarget::Dense(Tensor::from_floats(
                [[0.0, 0.0, 2.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.7]],
                &device,
            )),
            noise: None,
            weight: None,
        };

        let labels = batch.label_indices().into_data().to_vec::<i64>().unwrap();

        assert_eq!(labels, vec![2, 0, 1]);
    }

    #[test]
    fn label_indices_truncate_float_labels() {
        let device = Default::default();
        let batch = VoxelBatch::<TestBackend> {
            prediction: Tensor::zeros([3, 2], &device),
            ground_truth: VoxelTarget::Labels(Tensor::from_floats([0.0, 1.0, 1.6], &device)),
            noise: None,
            weight: None,
        };

        let labels = batch.label_indices().into_data().to_vec::<i64>().unwrap();

        assert_eq!(labels, vec![0, 1, 1]);
    }

    #[test]
    fn check_labels_rejects_out_of_range_values() {
        let device = Default::default();
        let batch = VoxelBatch::<TestBackend> {
            prediction: Tensor::zeros([2, 2], &device),
            ground_truth: VoxelTarget::Labels(Tensor::from_floats([0.0, 2.0], &device)),
            noise: None,
            weight: None,
        };

        match batch.check_labels() {
            Err(LossError::LabelOutOfRange { num_classes, .. }) => assert_eq!(num_classes, 2),
            other => panic!("Expected LabelOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn squeeze_voxel_map_rejects_wrong_size() {
        let device = Default::default();
        let weight = Tensor::<TestBackend, 5>::ones([1, 1, 2, 2, 2], &device);

        assert!(squeeze_voxel_map("weight_map", weight.clone(), 8).is_ok());
        assert!(matches!(
            squeeze_voxel_map("weight_map", weight, 4),
            Err(LossError::DimensionMismatch { .. })
        ));
    }
}
