//! Training data structures for HighRes-MT.
//!
//! The batch and output structures live in the model crate so the data crate
//! and the training loop can share them without depending on each other.

use burn::{prelude::*, tensor::backend::Backend};

/// A batch of volumes with one label map per task.
#[derive(Debug, Clone)]
pub struct MultiTaskBatch<B: Backend> {
    /// Input volumes, `[batch_size, channels, depth, height, width]`.
    pub images: Tensor<B, 5>,
    /// Task-1 labels, `[batch_size, 1, depth, height, width]`.
    pub task_1_labels: Tensor<B, 5>,
    /// Task-2 labels, `[batch_size, 1, depth, height, width]`.
    pub task_2_labels: Tensor<B, 5>,
    /// Optional per-voxel loss weights shared by both tasks,
    /// `[batch_size, 1, depth, height, width]`.
    pub weight_map: Option<Tensor<B, 5>>,
}

/// Output of a multi-task training or validation step.
#[derive(Debug, Clone)]
pub struct MultiTaskOutput<B: Backend> {
    /// Task-weighted sum of both task losses.
    pub loss: Tensor<B, 1>,
    pub task_1_loss: Tensor<B, 1>,
    pub task_2_loss: Tensor<B, 1>,
    /// Task-1 logits, `[batch_size, num_classes, depth, height, width]`.
    pub task_1: Tensor<B, 5>,
    /// Task-2 logits, `[batch_size, num_classes, depth, height, width]`.
    pub task_2: Tensor<B, 5>,
}

impl<B: Backend> MultiTaskBatch<B> {
    pub const fn new(
        images: Tensor<B, 5>,
        task_1_labels: Tensor<B, 5>,
        task_2_labels: Tensor<B, 5>,
    ) -> Self {
        Self {
            images,
            task_1_labels,
            task_2_labels,
            weight_map: None,
        }
    }

    #[must_use]
    pub fn with_weight_map(mut self, weight_map: Tensor<B, 5>) -> Self {
        self.weight_map = Some(weight_map);
        self
    }

    /// Get the batch size.
    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }
}

impl<B: Backend> MultiTaskOutput<B> {
    pub const fn new(
        loss: Tensor<B, 1>,
        task_1_loss: Tensor<B, 1>,
        task_2_loss: Tensor<B, 1>,
        task_1: Tensor<B, 5>,
        task_2: Tensor<B, 5>,
    ) -> Self {
        Self {
            loss,
            task_1_loss,
            task_2_loss,
            task_1,
            task_2,
        }
    }
}
