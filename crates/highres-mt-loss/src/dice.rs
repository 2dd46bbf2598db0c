//! Overlap-based losses on class probabilities.
//!
//! Every function here expects probabilities in [`VoxelBatch::prediction`]
//! (the aggregator applies the softmax) and compares them to a dense one-hot
//! target. An optional per-voxel weight scales each voxel's contribution to the
//! per-class sums.

use burn::{prelude::*, tensor::ElementConversion};

use crate::{
    loss_type::{GeneralisedDiceWeighting, LossParams},
    voxel::VoxelBatch,
};

/// Stand-in volume for absent classes before their weight is replaced.
const VOLUME_FLOOR: f64 = 1e-12;

/// Per-class sum over voxels, optionally weighted. `[n_voxels, C]` -> `[C]`.
pub(crate) fn class_sum<B: Backend>(
    values: Tensor<B, 2>,
    weight: Option<&Tensor<B, 1>>,
) -> Tensor<B, 1> {
    let [n_voxels, num_classes] = values.dims();
    let values = match weight {
        Some(weight) => values * weight.clone().reshape([n_voxels, 1]),
        None => values,
    };

    values.sum_dim(0).reshape([num_classes])
}

/// `1 - mean_c(2 Σ p·g / (Σ p² + Σ g² + ε))`
pub fn dice<B: Backend>(batch: &VoxelBatch<B>, params: &LossParams) -> Tensor<B, 1> {
    let prediction = batch.prediction.clone();
    let one_hot = batch.dense_target();
    let weight = batch.weight.as_ref();

    let numerator = class_sum(one_hot.clone() * prediction.clone(), weight).mul_scalar(2.0);
    let denominator =
        class_sum(prediction.powf_scalar(2.0), weight) + class_sum(one_hot.powf_scalar(2.0), weight);

    let score = numerator / denominator.add_scalar(params.epsilon);
    score.mean().neg().add_scalar(1.0)
}

/// `1 - mean_c((2 Σ p·g + ε) / (Σ p + Σ g + ε))`
pub fn dice_nosquare<B: Backend>(batch: &VoxelBatch<B>, params: &LossParams) -> Tensor<B, 1> {
    let prediction = batch.prediction.clone();
    let one_hot = batch.dense_target();
    let weight = batch.weight.as_ref();

    let numerator = class_sum(one_hot.clone() * prediction.clone(), weight).mul_scalar(2.0);
    let denominator = class_sum(prediction, weight) + class_sum(one_hot, weight);

    let score = numerator.add_scalar(params.epsilon) / denominator.add_scalar(params.epsilon);
    score.mean().neg().add_scalar(1.0)
}

/// Generalised Dice: classes are weighted by a function of their reference volume.
///
/// Classes absent from the reference would get an infinite weight; they take
/// the largest finite weight instead. When no class is present at all (an
/// empty reference or a weight map of zeros) every class is weighted equally.
pub fn generalised_dice<B: Backend>(batch: &VoxelBatch<B>, params: &LossParams) -> Tensor<B, 1> {
    let prediction = batch.prediction.clone();
    let one_hot = batch.dense_target();
    let weight = batch.weight.as_ref();

    let ref_vol = class_sum(one_hot.clone(), weight);
    let intersect = class_sum(one_hot * prediction.clone(), weight);
    let seg_vol = class_sum(prediction, weight);

    let class_weights = match params.generalised_dice_weighting {
        GeneralisedDiceWeighting::Uniform => Tensor::ones_like(&ref_vol),
        GeneralisedDiceWeighting::Square | GeneralisedDiceWeighting::Simple => {
            let absent = ref_vol.clone().equal_elem(0.0);
            let safe_vol = ref_vol.clone().clamp_min(VOLUME_FLOOR);
            let reciprocal = match params.generalised_dice_weighting {
                GeneralisedDiceWeighting::Square => safe_vol.powf_scalar(2.0).recip(),
                _ => safe_vol.recip(),
            };
            let finite = reciprocal.mask_fill(absent.clone(), 0.0);
            let largest = finite.clone().max().into_scalar().elem::<f64>();
            if largest > 0.0 {
                finite.mask_fill(absent, largest)
            } else {
                Tensor::ones_like(&ref_vol)
            }
        }
    };

    let numerator = (class_weights.clone() * intersect).sum().mul_scalar(2.0);
    let denominator = (class_weights * (seg_vol + ref_vol).clamp_min(1.0))
        .sum()
        .clamp_min(VOLUME_FLOOR);

    (numerator / denominator).neg().add_scalar(1.0)
}

/// `1 - mean_c(TP / (TP + α FP + β FN + ε))`
pub fn tversky<B: Backend>(batch: &VoxelBatch<B>, params: &LossParams) -> Tensor<B, 1> {
    let prediction = batch.prediction.clone();
    let one_hot = batch.dense_target();
    let weight = batch.weight.as_ref();

    let background_pred = prediction.clone().neg().add_scalar(1.0);
    let background_ref = one_hot.clone().neg().add_scalar(1.0);

    let true_pos = class_sum(prediction.clone() * one_hot.clone(), weight);
    let false_pos = class_sum(prediction * background_ref, weight).mul_scalar(params.tversky_alpha);
    let false_neg = class_sum(background_pred * one_hot, weight).mul_scalar(params.tversky_beta);

    let denominator = (true_pos.clone() + false_pos + false_neg).add_scalar(params.epsilon);
    (true_pos / denominator).mean().neg().add_scalar(1.0)
}

/// Dice (without squares) plus cross-entropy computed on probabilities.
pub fn dice_plus_xent<B: Backend>(batch: &VoxelBatch<B>, params: &LossParams) -> Tensor<B, 1> {
    let prediction = batch.prediction.clone();
    let one_hot = batch.dense_target();
    let weight = batch.weight.as_ref();

    let log_prob = prediction.add_scalar(params.epsilon).log();
    let per_voxel = (one_hot * log_prob).sum_dim(1).reshape([batch.num_voxels()]).neg();
    let xent = crate::cross_entropy::reduce_weighted(per_voxel, weight);

    dice_nosquare(batch, params) + xent
}

#[cfg(test)]
mod tests {
    use burn::tensor::ElementConversion;

    use super::*;
    use crate::{tests::TestBackend, voxel::VoxelTarget};

    fn scalar(tensor: Tensor<TestBackend, 1>) -> f32 {
        tensor.into_scalar().elem::<f32>()
    }

    fn batch(prediction: [[f32; 2]; 4], labels: [f32; 4]) -> VoxelBatch<TestBackend> {
        let device = Default::default();
        VoxelBatch {
            prediction: Tensor::from_floats(prediction, &device),
            ground_truth: VoxelTarget::Labels(Tensor::from_floats(labels, &device)),
            noise: None,
            weight: None,
        }
    }

    const PERFECT: [[f32; 2]; 4] = [[1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0]];
    const INVERTED: [[f32; 2]; 4] = [[0.0, 1.0], [0.0, 1.0], [1.0, 0.0], [1.0, 0.0]];
    const LABELS: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

    #[test]
    fn dice_is_zero_for_perfect_prediction() {
        let params = LossParams::new();
        let loss = scalar(dice(&batch(PERFECT, LABELS), &params));

        assert!(loss.abs() < 1e-4, "loss {loss}");
    }

    #[test]
    fn dice_is_one_for_inverted_prediction() {
        let params = LossParams::new();
        let loss = scalar(dice(&batch(INVERTED, LABELS), &params));

        assert!((loss - 1.0).abs() < 1e-4, "loss {loss}");
    }

    #[test]
    fn dice_with_half_probabilities() {
        let params = LossParams::new();
        let half = [[0.5, 0.5]; 4];
        let loss = scalar(dice(&batch(half, LABELS), &params));

        // per class: 2 * 1.0 / (4 * 0.25 + 2) = 2/3
        assert!((loss - 1.0 / 3.0).abs() < 1e-4, "loss {loss}");
    }

    #[test]
    fn dice_nosquare_with_half_probabilities() {
        let params = LossParams::new();
        let half = [[0.5, 0.5]; 4];
        let loss = scalar(dice_nosquare(&batch(half, LABELS), &params));

        // per class: 2 * 1.0 / (2 + 2) = 1/2
        assert!((loss - 0.5).abs() < 1e-4, "loss {loss}");
    }

    #[test]
    fn dice_ignores_zero_weight_voxels() {
        let device = Default::default();
        let params = LossParams::new();
        // Voxel 1 is wrong but carries no weight.
        let mut input = batch(
            [[1.0, 0.0], [0.0, 1.0], [0.0, 1.0], [0.0, 1.0]],
            LABELS,
        );
        input.weight = Some(Tensor::from_floats([1.0, 0.0, 1.0, 1.0], &device));

        let loss = scalar(dice(&input, &params));

        assert!(loss.abs() < 1e-4, "loss {loss}");
    }

    #[test]
    fn generalised_dice_perfect_and_absent_class() {
        let params = LossParams::new();
        let perfect = scalar(generalised_dice(&batch(PERFECT, LABELS), &params));
        assert!(perfect.abs() < 1e-4, "loss {perfect}");

        // Class 1 never appears in the reference; it borrows class 0's weight
        // and only contributes through the max(volume, 1) floor.
        let all_background = [[1.0, 0.0]; 4];
        let loss = scalar(generalised_dice(&batch(all_background, [0.0; 4]), &params));
        assert!(loss.is_finite());
        assert!((loss - 1.0 / 9.0).abs() < 1e-4, "loss {loss}");
    }

    #[test]
    fn generalised_dice_uniform_weighting() {
        let params =
            LossParams::new().with_generalised_dice_weighting(GeneralisedDiceWeighting::Uniform);
        let loss = scalar(generalised_dice(&batch(INVERTED, LABELS), &params));

        assert!((loss - 1.0).abs() < 1e-4, "loss {loss}");
    }

    #[test]
    fn generalised_dice_simple_weighting() {
        let params =
            LossParams::new().with_generalised_dice_weighting(GeneralisedDiceWeighting::Simple);
        let half = [[0.5, 0.5]; 4];
        let loss = scalar(generalised_dice(&batch(half, [0.0, 0.0, 0.0, 1.0]), &params));

        // ref = [3, 1], seg = [2, 2], intersect = [1.5, 0.5], w = [1/3, 1]
        // 1 - 2 * (0.5 + 0.5) / (5/3 + 3) = 4/7
        assert!((loss - 4.0 / 7.0).abs() < 1e-4, "loss {loss}");

        let square = scalar(generalised_dice(
            &batch(half, [0.0, 0.0, 0.0, 1.0]),
            &LossParams::new(),
        ));
        assert!((square - 0.625).abs() < 1e-4, "loss {square}");
    }

    #[test]
    fn generalised_dice_zero_weight_map_stays_finite() {
        let device = Default::default();
        for weighting in [GeneralisedDiceWeighting::Square, GeneralisedDiceWeighting::Simple] {
            let params = LossParams::new().with_generalised_dice_weighting(weighting.clone());
            let mut input = batch(PERFECT, LABELS);
            input.weight = Some(Tensor::zeros([4], &device));

            let loss = scalar(generalised_dice(&input, &params));

            assert!(loss.is_finite(), "{weighting:?} gave {loss}");
            assert!((loss - 1.0).abs() < 1e-4, "{weighting:?} gave {loss}");
        }
    }

    #[test]
    fn tversky_with_symmetric_penalties_matches_dice_nosquare() {
        let params = LossParams::new();
        let prediction = [[0.7, 0.3], [0.4, 0.6], [0.2, 0.8], [0.9, 0.1]];

        let tversky_loss = scalar(tversky(&batch(prediction, LABELS), &params));
        let dice_loss = scalar(dice_nosquare(&batch(prediction, LABELS), &params));

        assert!((tversky_loss - dice_loss).abs() < 1e-3);
    }

    #[test]
    fn dice_plus_xent_adds_cross_entropy_term() {
        let params = LossParams::new();
        let half = [[0.5, 0.5]; 4];
        let loss = scalar(dice_plus_xent(&batch(half, LABELS), &params));

        let expected = 0.5 + std::f32::consts::LN_2;
        assert!((loss - expected).abs() < 1e-3, "loss {loss}");
    }
}
