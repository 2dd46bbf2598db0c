//! Error types for segmentation loss computation.

use thiserror::Error;

/// Errors that can occur while configuring or evaluating a segmentation loss.
#[derive(Debug, Error)]
pub enum LossError {
    /// Empty prediction list provided to the loss function
    #[error("predictions cannot be empty - at least one prediction tensor is required")]
    EmptyPredictions,

    /// Invalid tensor dimensions
    #[error("tensor dimension mismatch for {tensor}: expected {expected}, got {actual}")]
    DimensionMismatch {
        tensor: String,
        expected: String,
        actual: String,
    },

    /// Invalid parameter values
    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    /// Ground-truth labels outside `[0, num_classes)`
    #[error("label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: f64, num_classes: usize },

    /// Unknown loss type name
    #[error("unknown segmentation loss type: {name}")]
    UnknownLossType { name: String },
}

/// A specialized `Result` type for loss operations.
pub type LossResult<T> = Result<T, LossError>;
