//! Cross-entropy losses on logits.
//!
//! Both functions expect raw logits in [`VoxelBatch::prediction`]; the softmax
//! is folded into a `log_softmax` so the aggregator must not apply one first.

use burn::{prelude::*, tensor::activation::log_softmax};

use crate::voxel::VoxelBatch;

/// Floor of the weight-map sum in the weighted reduction.
const WEIGHT_SUM_FLOOR: f64 = 1e-6;

/// Per-voxel sparse softmax cross-entropy, shape `[n_voxels]`.
pub fn voxel_cross_entropy<B: Backend>(batch: &VoxelBatch<B>) -> Tensor<B, 1> {
    let n_voxels = batch.num_voxels();
    let labels = batch.label_indices().reshape([n_voxels, 1]);

    log_softmax(batch.prediction.clone(), 1)
        .gather(1, labels)
        .reshape([n_voxels])
        .neg()
}

/// Mean of per-voxel losses, or their weighted sum normalised by `max(Σw, 1e-6)`.
pub fn reduce_weighted<B: Backend>(
    per_voxel: Tensor<B, 1>,
    weight: Option<&Tensor<B, 1>>,
) -> Tensor<B, 1> {
    match weight {
        None => per_voxel.mean(),
        Some(weight) => {
            let weight_sum = weight.clone().sum().clamp_min(WEIGHT_SUM_FLOOR);
            (per_voxel * weight.clone() / weight_sum).sum()
        }
    }
}

/// Sparse softmax cross-entropy between logits and labels.
pub fn cross_entropy<B: Backend>(batch: &VoxelBatch<B>) -> Tensor<B, 1> {
    reduce_weighted(voxel_cross_entropy(batch), batch.weight.as_ref())
}

/// Cross-entropy attenuated by a per-voxel log-variance `s`:
/// `exp(-s) * CE + s / 2`.
///
/// Voxels the network marks as noisy contribute less to the data term and pay
/// for it through the `s / 2` regulariser. Without noise this is plain
/// [`cross_entropy`].
pub fn scaled_approx_softmax<B: Backend>(batch: &VoxelBatch<B>) -> Tensor<B, 1> {
    let entropy = voxel_cross_entropy(batch);

    let per_voxel = match &batch.noise {
        Some(log_variance) => {
            entropy * log_variance.clone().neg().exp() + log_variance.clone().mul_scalar(0.5)
        }
        None => entropy,
    };

    reduce_weighted(per_voxel, batch.weight.as_ref())
}

#[cfg(test)]
mod tests {
    use burn::tensor::ElementConversion;

    use super::*;
    use crate::{tests::TestBackend, voxel::VoxelTarget};

    fn scalar(tensor: Tensor<TestBackend, 1>) -> f32 {
        tensor.into_scalar().elem::<f32>()
    }

    fn two_voxel_batch(
        noise: Option<[f32; 2]>,
        weight: Option<[f32; 2]>,
    ) -> VoxelBatch<TestBackend> {
        let device = Default::default();
        VoxelBatch {
            prediction: Tensor::from_floats([[2.0, 0.0], [0.0, 0.0]], &device),
            ground_truth: VoxelTarget::Labels(Tensor::from_floats([0.0, 1.0], &device)),
            noise: noise.map(|values| Tensor::from_floats(values, &device)),
            weight: weight.map(|values| Tensor::from_floats(values, &device)),
        }
    }

    // -log(softmax([2, 0])[0]) and -log(softmax([0, 0])[1])
    const CE_FIRST: f32 = 0.126_928;
    const CE_SECOND: f32 = std::f32::consts::LN_2;

    #[test]
    fn cross_entropy_unweighted_is_mean() {
        let loss = scalar(cross_entropy(&two_voxel_batch(None, None)));

        assert!((loss - (CE_FIRST + CE_SECOND) / 2.0).abs() < 1e-5, "loss {loss}");
    }

    #[test]
    fn cross_entropy_weighted_normalises_by_weight_sum() {
        let loss = scalar(cross_entropy(&two_voxel_batch(None, Some([3.0, 1.0]))));

        let expected = (3.0 * CE_FIRST + CE_SECOND) / 4.0;
        assert!((loss - expected).abs() < 1e-5, "loss {loss}, expected {expected}");
    }

    #[test]
    fn cross_entropy_zero_weight_map_stays_finite() {
        let loss = scalar(cross_entropy(&two_voxel_batch(None, Some([0.0, 0.0]))));

        assert!(loss.is_finite());
        assert!(loss.abs() < 1e-6);
    }

    #[test]
    fn cross_entropy_accepts_dense_targets() {
        let device = Default::default();
        let mut batch = two_voxel_batch(None, None);
        batch.ground_truth =
            VoxelTarget::Dense(Tensor::from_floats([[1.0, 0.0], [0.0, 1.0]], &device));

        let loss = scalar(cross_entropy(&batch));

        assert!((loss - (CE_FIRST + CE_SECOND) / 2.0).abs() < 1e-5);
    }

    #[test]
    fn cross_entropy_dense_target_reads_last_channel() {
        let device = Default::default();
        // One voxel, three classes. The last channel holds 0, so the label is
        // class 0 even though the one-hot peak sits on class 1.
        let batch = VoxelBatch::<TestBackend> {
            prediction: Tensor::from_floats([[0.0, 5.0, 0.0]], &device),
            ground_truth: VoxelTarget::Dense(Tensor::from_floats([[0.0, 1.0, 0.0]], &device)),
            noise: None,
            weight: None,
        };

        let loss = scalar(cross_entropy(&batch));

        let expected = 5.0 + (1.0 + 2.0 * (-5.0f32).exp()).ln();
        assert!((loss - expected).abs() < 1e-4, "loss {loss}, expected {expected}");
    }

    #[test]
    fn scaled_approx_softmax_without_noise_matches_cross_entropy() {
        let batch = two_voxel_batch(None, None);

        let scaled = scalar(scaled_approx_softmax(&batch));
        let plain = scalar(cross_entropy(&batch));

        assert!((scaled - plain).abs() < 1e-6);
    }

    #[test]
    fn scaled_approx_softmax_attenuates_noisy_voxels() {
        let log_variance = 2.0f32;
        let batch = two_voxel_batch(Some([0.0, log_variance]), None);

        let loss = scalar(scaled_approx_softmax(&batch));

        let expected =
            (CE_FIRST + (-log_variance).exp() * CE_SECOND + 0.5 * log_variance) / 2.0;
        assert!((loss - expected).abs() < 1e-5, "loss {loss}, expected {expected}");
    }
}
