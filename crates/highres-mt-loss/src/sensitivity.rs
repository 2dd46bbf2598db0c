//! Sensitivity/specificity loss on class probabilities.

use burn::prelude::*;

use crate::{dice::class_sum, loss_type::LossParams, voxel::VoxelBatch};

/// Squared-error form of sensitivity and specificity, summed over classes.
///
/// For each class the squared error is averaged over the voxels that belong to
/// the class (specificity term) and over the voxels that do not (sensitivity
/// term); `sensitivity_weight` trades the two off.
pub fn sensitivity_specificity<B: Backend>(
    batch: &VoxelBatch<B>,
    params: &LossParams,
) -> Tensor<B, 1> {
    let one_hot = batch.dense_target();
    let background = one_hot.clone().neg().add_scalar(1.0);
    let weight = batch.weight.as_ref();

    let squared_error = (one_hot.clone() - batch.prediction.clone()).powf_scalar(2.0);

    let specificity_part = class_sum(squared_error.clone() * one_hot.clone(), weight)
        / class_sum(one_hot, weight).add_scalar(params.epsilon);
    let sensitivity_part = class_sum(squared_error * background.clone(), weight)
        / class_sum(background, weight).add_scalar(params.epsilon);

    let ratio = params.sensitivity_weight;
    (specificity_part.mul_scalar(ratio) + sensitivity_part.mul_scalar(1.0 - ratio)).sum()
}
