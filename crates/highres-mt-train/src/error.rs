//! Error types specific to the highres-mt-train crate.

use thiserror::Error;

/// Error type for dataset construction and synthetic data generation.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Error when a dataset would contain no items.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Error when an item's buffers do not match its declared shape.
    #[error("Item {index}: {field} has {actual} values, expected {expected}")]
    InconsistentItem {
        /// Position of the item in the dataset.
        index: usize,
        /// The offending buffer.
        field: &'static str,
        /// Values implied by the item shape.
        expected: usize,
        /// Values present in the buffer.
        actual: usize,
    },

    /// Error when items of one dataset have different shapes.
    #[error("Item {index} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Position of the item in the dataset.
        index: usize,
        /// Shape of the first item, `[channels, depth, height, width]`.
        expected: [usize; 4],
        /// Shape of the offending item.
        actual: [usize; 4],
    },

    /// Error for invalid generator settings.
    #[error("Invalid dataset configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;
