//! In-memory volume dataset and batcher for multi-task training.
//!
//! Items hold raw buffers; the batcher creates tensors on the target device,
//! following Burn's convention that datasets return plain data.

use std::marker::PhantomData;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Tensor, TensorData},
};
use highres_mt_model::training::MultiTaskBatch;

use crate::error::{DatasetError, DatasetResult};

/// One volume with a label map per task.
#[derive(Debug, Clone)]
pub struct VolumeItem {
    /// Intensities in `[C, D, H, W]` order.
    pub image: Vec<f32>,
    /// Task-1 class labels in `[D, H, W]` order.
    pub task_1_labels: Vec<f32>,
    /// Task-2 class labels in `[D, H, W]` order.
    pub task_2_labels: Vec<f32>,
    pub channels: usize,
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

impl VolumeItem {
    /// `[channels, depth, height, width]`
    pub const fn shape(&self) -> [usize; 4] {
        [self.channels, self.depth, self.height, self.width]
    }

    pub const fn num_voxels(&self) -> usize {
        self.depth * self.height * self.width
    }

    /// Check that every buffer matches the declared shape.
    ///
    /// # Errors
    ///
    /// Returns `Err(DatasetError::InconsistentItem)` naming the first bad buffer.
    pub fn validate(&self, index: usize) -> DatasetResult<()> {
        let voxels = self.num_voxels();
        let buffers = [
            ("image", self.image.len(), voxels * self.channels),
            ("task_1_labels", self.task_1_labels.len(), voxels),
            ("task_2_labels", self.task_2_labels.len(), voxels),
        ];
        for (field, actual, expected) in buffers {
            if actual != expected || expected == 0 {
                return Err(DatasetError::InconsistentItem {
                    index,
                    field,
                    expected,
                    actual,
                });
            }
        }

        Ok(())
    }
}

/// Batcher stacking [`VolumeItem`]s into a [`MultiTaskBatch`].
#[derive(Clone, Default)]
pub struct MultiTaskBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> MultiTaskBatcher<B> {
    /// Create a new multi-task batcher.
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, VolumeItem, MultiTaskBatch<B>> for MultiTaskBatcher<B> {
    fn batch(&self, items: Vec<VolumeItem>, device: &B::Device) -> MultiTaskBatch<B> {
        let batch_size = items.len();

        let mut images = Vec::with_capacity(batch_size);
        let mut task_1 = Vec::with_capacity(batch_size);
        let mut task_2 = Vec::with_capacity(batch_size);

        for item in items {
            let shape = item.shape();
            let label_shape = [1, item.depth, item.height, item.width];

            images.push(Tensor::<B, 4>::from_data(
                TensorData::new(item.image, shape),
                device,
            ));
            task_1.push(Tensor::<B, 4>::from_data(
                TensorData::new(item.task_1_labels, label_shape),
                device,
            ));
            task_2.push(Tensor::<B, 4>::from_data(
                TensorData::new(item.task_2_labels, label_shape),
                device,
            ));
        }

        // [B, C, D, H, W]
        MultiTaskBatch::new(
            Tensor::stack(images, 0),
            Tensor::stack(task_1, 0),
            Tensor::stack(task_2, 0),
        )
    }
}

/// Dataset of volumes that share one shape, held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryVolumeDataset {
    items: Vec<VolumeItem>,
}

impl InMemoryVolumeDataset {
    /// Create a dataset, checking that every item is consistent and that all
    /// items share the shape of the first one.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty item list, an inconsistent item or a
    /// shape mismatch.
    pub fn new(items: Vec<VolumeItem>) -> DatasetResult<Self> {
        let Some(first) = items.first() else {
            return Err(DatasetError::EmptyDataset);
        };
        let expected = first.shape();

        for (index, item) in items.iter().enumerate() {
            item.validate(index)?;
            if item.shape() != expected {
                return Err(DatasetError::ShapeMismatch {
                    index,
                    expected,
                    actual: item.shape(),
                });
            }
        }

        Ok(Self { items })
    }

    /// Shape shared by every item, `[channels, depth, height, width]`.
    pub fn item_shape(&self) -> [usize; 4] {
        self.items.first().map_or([0; 4], VolumeItem::shape)
    }

    /// Split off the last `count` items, e.g. as a validation set.
    ///
    /// # Errors
    ///
    /// Returns `Err(DatasetError::EmptyDataset)` if either part would be empty.
    pub fn split_off(mut self, count: usize) -> DatasetResult<(Self, Self)> {
        if count == 0 || count >= self.items.len() {
            return Err(DatasetError::EmptyDataset);
        }
        let tail = self.items.split_off(self.items.len() - count);

        Ok((self, Self { items: tail }))
    }
}

impl Dataset<VolumeItem> for InMemoryVolumeDataset {
    fn get(&self, index: usize) -> Option<VolumeItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use burn::data::dataloader::batcher::Batcher;

    use super::*;
    use crate::tests::TestBackend;

    fn item(value: f32, size: usize) -> VolumeItem {
        let voxels = size * size * size;
        VolumeItem {
            image: vec![value; voxels],
            task_1_labels: vec![1.0; voxels],
            task_2_labels: vec![0.0; voxels],
            channels: 1,
            depth: size,
            height: size,
            width: size,
        }
    }

    #[test]
    fn batcher_creates_correct_batch_dimensions() {
        let device = Default::default();
        let batcher = MultiTaskBatcher::<TestBackend>::new();

        let batch = batcher.batch(vec![item(0.5, 8), item(0.3, 8)], &device);

        assert_eq!(batch.images.shape().dims, [2, 1, 8, 8, 8]);
        assert_eq!(batch.task_1_labels.shape().dims, [2, 1, 8, 8, 8]);
        assert_eq!(batch.task_2_labels.shape().dims, [2, 1, 8, 8, 8]);
        let first = batch.images.narrow(0, 0, 1).mean().into_scalar();
        assert!((first - 0.5).abs() < 1e-6);
    }

    #[test]
    fn dataset_rejects_empty_and_inconsistent_items() {
        assert!(matches!(
            InMemoryVolumeDataset::new(Vec::new()),
            Err(DatasetError::EmptyDataset)
        ));

        let mut broken = item(0.0, 4);
        broken.task_2_labels.pop();
        match InMemoryVolumeDataset::new(vec![item(0.0, 4), broken]) {
            Err(DatasetError::InconsistentItem { index, field, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(field, "task_2_labels");
            }
            other => panic!("Expected InconsistentItem, got {other:?}"),
        }
    }

    #[test]
    fn dataset_rejects_mixed_shapes() {
        let result = InMemoryVolumeDataset::new(vec![item(0.0, 4), item(0.0, 8)]);

        assert!(matches!(result, Err(DatasetError::ShapeMismatch { index: 1, .. })));
    }

    #[test]
    fn dataset_get_and_split() {
        let dataset =
            InMemoryVolumeDataset::new((0..5).map(|i| item(i as f32, 4)).collect()).unwrap();
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.item_shape(), [1, 4, 4, 4]);
        assert!(dataset.get(5).is_none());

        let (train, valid) = dataset.split_off(2).unwrap();
        assert_eq!(train.len(), 3);
        assert_eq!(valid.len(), 2);
        assert_eq!(valid.get(0).unwrap().image[0], 3.0);
    }
}
