use highres_mt_loss::LossError;
use thiserror::Error;

/// The error type for HighRes-MT model operations.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Error for when an invalid model configuration is provided.
    /// This can happen if configuration parameters are logically inconsistent.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when an input tensor has an invalid shape.
    #[error("Invalid input tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },

    /// Error for when a grouped layer receives the wrong kind of flow.
    #[error("Invalid grouped flow for {layer}: expected {expected}")]
    InvalidFlow {
        /// The layer that rejected the flow.
        layer: String,
        /// The flow the layer was built for.
        expected: String,
    },

    /// Error for when a requested intermediate layer does not exist.
    #[error("Layer index {layer_id} out of range for {num_layers} layer outputs")]
    LayerOutOfRange {
        /// The requested index, negative values counting from the end.
        layer_id: isize,
        /// Number of recorded layer outputs.
        num_layers: usize,
    },

    /// Error raised by the segmentation loss.
    #[error("Loss computation failed: {0}")]
    Loss(#[from] LossError),
}

/// A specialized `Result` type for HighRes-MT model operations.
pub type ModelResult<T> = Result<T, ModelError>;
