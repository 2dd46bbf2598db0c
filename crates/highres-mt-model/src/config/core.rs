//! Core configuration structures for HighRes-MT.
//!
//! The layer specifications mirror the classic HighRes3DNet table: a 3x3x3
//! input convolution, three residual stages with dilation 1, 2 and 4, a 1x1x1
//! feature convolution and one 1x1x1 classification head per task.

use burn::prelude::*;
use highres_mt_loss::{LossParams, LossType};

use super::enums::{Activation, GroupConnection};
use crate::{
    error::{ModelError, ModelResult},
    layers::gumbel_softmax_decay,
};

/// Main configuration for the HighRes-MT network.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Number of segmentation classes of each task head.
    pub num_classes: usize,
    /// Channels of the input volume.
    #[config(default = 1)]
    pub in_channels: usize,
    #[config(default = "Activation::PRelu")]
    pub acti_func: Activation,
    /// Learned categorical grouping shared by every grouped convolution.
    #[config(default = "CategoricalConfig::new()")]
    pub categorical: CategoricalConfig,
    #[config(default = "LayerSpecs::new()")]
    pub layers: LayerSpecs,
    /// Every spatial dimension of the input must be a multiple of this value.
    #[config(default = 8)]
    pub spatial_divisor: usize,
    /// Gumbel-softmax temperature schedule.
    #[config(default = "AnnealingConfig::new()")]
    pub annealing: AnnealingConfig,
    /// Loss applied to both task heads.
    ///
    /// The network has no noise output, so `ScaledApproxSoftmax` trains as
    /// plain cross-entropy (weighted by the batch weight map, if any).
    #[config(default = "LossType::ScaledApproxSoftmax")]
    pub loss_type: LossType,
    #[config(default = "LossParams::new()")]
    pub loss_params: LossParams,
    /// Weights of the task-1 and task-2 losses in the total loss.
    #[config(default = "[1.0, 1.0]")]
    pub task_weights: [f64; 2],
}

/// Learned categorical grouping of output kernels into task-1, shared and
/// task-2 groups.
#[derive(Config, Debug)]
pub struct CategoricalConfig {
    /// Make Gumbel samples hard in the forward pass (straight-through estimator).
    #[config(default = true)]
    pub use_hardcat: bool,
    /// Let the grouping logits receive gradients.
    #[config(default = true)]
    pub learn_cat: bool,
    /// Prior group probabilities `[task_1, shared, task_2]`.
    #[config(default = "[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0]")]
    pub p_init: [f64; 3],
    /// Initialise the logits to `log(p_init)`; uniform otherwise.
    #[config(default = true)]
    pub init_cat: bool,
    /// Assign contiguous channel ranges in `p_init` proportions instead of learning.
    #[config(default = false)]
    pub constant_grouping: bool,
    #[config(default = "GroupConnection::Mixed")]
    pub group_connection: GroupConnection,
}

/// A plain or grouped convolution stage.
#[derive(Config, Debug)]
pub struct ConvSpec {
    pub name: String,
    pub n_features: usize,
    pub kernel_size: usize,
}

/// A stack of residual blocks sharing one dilation factor.
#[derive(Config, Debug)]
pub struct ResidualSpec {
    pub name: String,
    pub n_features: usize,
    /// Kernel size of each convolution inside a block.
    #[config(default = "vec![3, 3]")]
    pub kernels: Vec<usize>,
    /// Number of blocks per stream.
    #[config(default = 3)]
    pub repeat: usize,
    #[config(default = 1)]
    pub dilation: usize,
}

/// Layer table of the network.
#[derive(Config, Debug)]
pub struct LayerSpecs {
    #[config(default = "ConvSpec::new(\"conv_0\".to_string(), 16, 3)")]
    pub conv_0: ConvSpec,
    #[config(default = "default_residual_stages()")]
    pub residual: Vec<ResidualSpec>,
    #[config(default = "ConvSpec::new(\"conv_1\".to_string(), 80, 1)")]
    pub conv_1: ConvSpec,
    /// Kernel size of the per-task classification heads (`conv_2`).
    #[config(default = 1)]
    pub head_kernel_size: usize,
}

fn default_residual_stages() -> Vec<ResidualSpec> {
    [("res_1", 16, 1), ("res_2", 32, 2), ("res_3", 64, 4)]
        .into_iter()
        .map(|(name, n_features, dilation)| {
            ResidualSpec::new(name.to_string(), n_features).with_dilation(dilation)
        })
        .collect()
}

/// Exponential decay of the Gumbel-softmax temperature, floored at a minimum.
#[derive(Config, Debug)]
pub struct AnnealingConfig {
    #[config(default = 1.0)]
    pub max_temperature: f64,
    #[config(default = 0.05)]
    pub min_temperature: f64,
    /// Decay rate per training iteration.
    #[config(default = 1e-4)]
    pub decay_rate: f64,
}

impl AnnealingConfig {
    /// Temperature at the given training iteration.
    pub fn temperature(&self, iteration: usize) -> f64 {
        gumbel_softmax_decay(
            iteration,
            self.decay_rate,
            self.max_temperature,
            self.min_temperature,
        )
    }
}

impl ModelConfig {
    /// Validate the configuration and return appropriate errors for invalid settings.
    ///
    /// # Errors
    ///
    /// Returns `Err(ModelError::InvalidConfiguration)` if any validation rule is violated.
    pub fn validate(&self) -> ModelResult<()> {
        if self.num_classes == 0 {
            return Err(invalid("num_classes must be positive".to_owned()));
        }
        if self.in_channels == 0 {
            return Err(invalid("in_channels must be positive".to_owned()));
        }
        if self.spatial_divisor == 0 {
            return Err(invalid("spatial_divisor must be positive".to_owned()));
        }

        self.categorical.validate()?;
        self.annealing.validate()?;

        for conv in [&self.layers.conv_0, &self.layers.conv_1] {
            if conv.n_features == 0 {
                return Err(invalid(format!("{} must have at least one feature", conv.name)));
            }
            check_kernel(&conv.name, conv.kernel_size)?;
        }
        check_kernel("conv_2", self.layers.head_kernel_size)?;

        if self.layers.residual.is_empty() {
            return Err(invalid("at least one residual stage is required".to_owned()));
        }
        for stage in &self.layers.residual {
            if stage.repeat == 0 {
                return Err(invalid(format!("{}: repeat must be positive", stage.name)));
            }
            if stage.kernels.is_empty() {
                return Err(invalid(format!("{}: kernels cannot be empty", stage.name)));
            }
            if stage.n_features == 0 || stage.dilation == 0 {
                return Err(invalid(format!(
                    "{}: n_features and dilation must be positive",
                    stage.name
                )));
            }
            for &kernel in &stage.kernels {
                check_kernel(&stage.name, kernel)?;
            }
        }

        if self.task_weights.iter().any(|weight| *weight < 0.0) {
            return Err(invalid(format!(
                "task weights must be non-negative, got {:?}",
                self.task_weights
            )));
        }

        Ok(())
    }
}

impl CategoricalConfig {
    /// # Errors
    ///
    /// Returns `Err(ModelError::InvalidConfiguration)` unless `p_init` is a
    /// probability vector.
    pub fn validate(&self) -> ModelResult<()> {
        if self.p_init.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(invalid(format!(
                "p_init entries must be non-negative, got {:?}",
                self.p_init
            )));
        }
        let total: f64 = self.p_init.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(invalid(format!("p_init must sum to 1, got {total}")));
        }

        Ok(())
    }
}

impl AnnealingConfig {
    /// # Errors
    ///
    /// Returns `Err(ModelError::InvalidConfiguration)` for non-positive
    /// temperatures, `min > max` or a negative decay rate.
    pub fn validate(&self) -> ModelResult<()> {
        if self.min_temperature <= 0.0 || self.max_temperature <= 0.0 {
            return Err(invalid(format!(
                "temperatures must be positive, got min={} max={}",
                self.min_temperature, self.max_temperature
            )));
        }
        if self.min_temperature > self.max_temperature {
            return Err(invalid(format!(
                "min_temperature ({}) exceeds max_temperature ({})",
                self.min_temperature, self.max_temperature
            )));
        }
        if self.decay_rate < 0.0 {
            return Err(invalid(format!(
                "decay_rate must be non-negative, got {}",
                self.decay_rate
            )));
        }

        Ok(())
    }
}

fn check_kernel(layer: &str, kernel_size: usize) -> ModelResult<()> {
    // SAME padding is symmetric only for odd kernels.
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(invalid(format!(
            "{layer}: kernel size must be odd, got {kernel_size}"
        )));
    }

    Ok(())
}

fn invalid(reason: String) -> ModelError {
    ModelError::InvalidConfiguration { reason }
}
