//! Registry of per-voxel segmentation loss functions.
//!
//! [`LossType`] names a loss function; [`LossType::compute`] dispatches to it with
//! the function-specific [`LossParams`]. Names accepted by [`LossType::from_str`]
//! follow the conventional spelling used in training configuration files.

use std::str::FromStr;

use burn::prelude::*;

use crate::{
    cross_entropy::{cross_entropy, scaled_approx_softmax},
    dice::{dice, dice_nosquare, dice_plus_xent, generalised_dice, tversky},
    error::LossError,
    sensitivity::sensitivity_specificity,
    voxel::VoxelBatch,
};

/// The per-voxel loss function applied to every batch element.
#[derive(Config, Debug, PartialEq, Eq, Hash)]
pub enum LossType {
    /// Cross-entropy on logits attenuated by a per-voxel log-variance.
    ScaledApproxSoftmax,
    /// Sparse softmax cross-entropy on logits.
    CrossEntropy,
    /// Soft Dice with squared denominators.
    Dice,
    /// Soft Dice without squared denominators.
    DiceNoSquare,
    /// Generalised Dice with class-volume weighting.
    GeneralisedDice,
    /// Tversky index.
    Tversky,
    /// Weighted sum of sensitivity and specificity errors.
    SensitivitySpecificity,
    /// Dice plus cross-entropy on probabilities.
    DicePlusXent,
}

impl Default for LossType {
    fn default() -> Self {
        Self::ScaledApproxSoftmax
    }
}

/// Class weighting used by [`LossType::GeneralisedDice`].
#[derive(Config, Debug, PartialEq, Eq, Hash)]
pub enum GeneralisedDiceWeighting {
    /// `1 / volume²`
    Square,
    /// `1 / volume`
    Simple,
    /// Every class weighs 1.
    Uniform,
}

/// Function-specific parameters forwarded to the per-voxel loss.
#[derive(Config, Debug)]
pub struct LossParams {
    /// False-positive penalty of the Tversky index.
    #[config(default = 0.5)]
    pub tversky_alpha: f64,
    /// False-negative penalty of the Tversky index.
    #[config(default = 0.5)]
    pub tversky_beta: f64,
    /// Share of the sensitivity term in the sensitivity/specificity loss.
    #[config(default = 0.05)]
    pub sensitivity_weight: f64,
    #[config(default = "GeneralisedDiceWeighting::Square")]
    pub generalised_dice_weighting: GeneralisedDiceWeighting,
    /// Stabiliser added to overlap denominators.
    #[config(default = 1e-5)]
    pub epsilon: f64,
}

impl LossType {
    /// All loss types, in registry order.
    pub const ALL: [Self; 8] = [
        Self::ScaledApproxSoftmax,
        Self::CrossEntropy,
        Self::Dice,
        Self::DiceNoSquare,
        Self::GeneralisedDice,
        Self::Tversky,
        Self::SensitivitySpecificity,
        Self::DicePlusXent,
    ];

    /// Registry name of the loss type.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ScaledApproxSoftmax => "scaled_approx_softmax",
            Self::CrossEntropy => "cross_entropy",
            Self::Dice => "dice",
            Self::DiceNoSquare => "dice_nosquare",
            Self::GeneralisedDice => "generalised_dice",
            Self::Tversky => "tversky",
            Self::SensitivitySpecificity => "sensitivity_specificity",
            Self::DicePlusXent => "dice_plus_xent",
        }
    }

    /// Whether the loss consumes raw logits and applies its own softmax.
    pub const fn consumes_logits(&self) -> bool {
        matches!(self, Self::CrossEntropy | Self::ScaledApproxSoftmax)
    }

    /// Evaluate the loss on one batch element.
    pub fn compute<B: Backend>(&self, batch: &VoxelBatch<B>, params: &LossParams) -> Tensor<B, 1> {
        match self {
            Self::ScaledApproxSoftmax => scaled_approx_softmax(batch),
            Self::CrossEntropy => cross_entropy(batch),
            Self::Dice => dice(batch, params),
            Self::DiceNoSquare => dice_nosquare(batch, params),
            Self::GeneralisedDice => generalised_dice(batch, params),
            Self::Tversky => tversky(batch, params),
            Self::SensitivitySpecificity => sensitivity_specificity(batch, params),
            Self::DicePlusXent => dice_plus_xent(batch, params),
        }
    }
}

impl FromStr for LossType {
    type Err = LossError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let normalised = name.trim().to_ascii_lowercase().replace('-', "_");
        let loss_type = match normalised.as_str() {
            "scaled_approx_softmax" => Self::ScaledApproxSoftmax,
            "cross_entropy" | "crossentropy" | "xent" => Self::CrossEntropy,
            "dice" => Self::Dice,
            "dice_nosquare" | "dice_ns" => Self::DiceNoSquare,
            "generalised_dice" | "generalized_dice" | "gdsc" => Self::GeneralisedDice,
            "tversky" => Self::Tversky,
            "sensitivity_specificity" | "sensspec" => Self::SensitivitySpecificity,
            "dice_plus_xent" | "diceplusxent" => Self::DicePlusXent,
            _ => {
                return Err(LossError::UnknownLossType {
                    name: name.to_string(),
                })
            }
        };

        Ok(loss_type)
    }
}
