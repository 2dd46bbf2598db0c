//! Segmentation losses for multi-scale, multi-batch 3D predictions.
//!
//! This crate implements the per-voxel loss functions used to train HighRes-MT
//! networks with the Burn deep learning framework, together with the
//! [`SegmentationLoss`] aggregator that averages them over batch elements and
//! prediction scales.
//!
//! ## Loss Functions
//!
//! ### On logits
//! - **[`LossType::CrossEntropy`]**: sparse softmax cross-entropy
//! - **[`LossType::ScaledApproxSoftmax`]**: cross-entropy attenuated by a
//!   learned per-voxel log-variance (Bayesian noise model)
//!
//! ### On probabilities
//! - **[`LossType::Dice`]** and **[`LossType::DiceNoSquare`]**: soft Dice
//! - **[`LossType::GeneralisedDice`]**: volume-weighted Dice
//! - **[`LossType::Tversky`]**: Tversky index
//! - **[`LossType::SensitivitySpecificity`]**: weighted sensitivity/specificity
//! - **[`LossType::DicePlusXent`]**: Dice plus cross-entropy
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::prelude::*;
//! use highres_mt_loss::{LossResult, LossType, SegmentationLoss, SegmentationLossConfig};
//!
//! fn create_loss<B: Backend>() -> LossResult<SegmentationLoss<B>> {
//!     SegmentationLossConfig::new(2)
//!         .with_loss_type(LossType::Dice)
//!         .init()
//! }
//! ```
//!
//! Predictions are channels-first, `[batch_size, num_classes, spatial...]`.
//! Ground truth is either a label map with one channel or a dense map with
//! `num_classes` channels.

mod cross_entropy;
mod dice;
mod error;
mod loss_type;
mod segmentation;
mod sensitivity;
mod voxel;

// Re-export core loss functions and configurations
#[doc(inline)]
pub use cross_entropy::{cross_entropy, reduce_weighted, scaled_approx_softmax, voxel_cross_entropy};
#[doc(inline)]
pub use dice::{dice, dice_nosquare, dice_plus_xent, generalised_dice, tversky};
#[doc(inline)]
pub use error::{LossError, LossResult};
#[doc(inline)]
pub use loss_type::{GeneralisedDiceWeighting, LossParams, LossType};
#[doc(inline)]
pub use segmentation::{SegmentationLoss, SegmentationLossConfig};
#[doc(inline)]
pub use sensitivity::sensitivity_specificity;
#[doc(inline)]
pub use voxel::{one_hot, spatial_voxels, squeeze_voxel_map, to_voxel_major, VoxelBatch, VoxelTarget};
