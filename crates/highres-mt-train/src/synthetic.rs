//! Reproducible synthetic two-task volumes.
//!
//! Each volume contains one bright sphere on a noisy background. Task 1
//! labels the whole sphere, task 2 labels a concentric inner core, so the
//! two tasks share most of their low-level features.

use burn::config::Config;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    dataset::{InMemoryVolumeDataset, VolumeItem},
    error::{DatasetError, DatasetResult},
};

/// Settings for [`SyntheticVolumeConfig::generate`].
#[derive(Config, Debug)]
pub struct SyntheticVolumeConfig {
    #[config(default = 16)]
    pub num_volumes: usize,
    /// Edge length of the cubic volumes.
    #[config(default = 16)]
    pub size: usize,
    #[config(default = 1)]
    pub channels: usize,
    /// Uniform noise is drawn from `[-noise_amplitude, noise_amplitude]`.
    #[config(default = 0.1)]
    pub noise_amplitude: f32,
    /// Smallest sphere radius as a fraction of `size`.
    #[config(default = 0.15)]
    pub min_radius_fraction: f32,
    /// Largest sphere radius as a fraction of `size`.
    #[config(default = 0.35)]
    pub max_radius_fraction: f32,
    /// Radius of the task-2 core relative to the sphere radius.
    #[config(default = 0.5)]
    pub core_fraction: f32,
    #[config(default = 42)]
    pub seed: u64,
}

impl SyntheticVolumeConfig {
    /// # Errors
    ///
    /// Returns `Err(DatasetError::InvalidConfiguration)` describing the first
    /// invalid field.
    pub fn validate(&self) -> DatasetResult<()> {
        let invalid = |reason: &str| {
            Err(DatasetError::InvalidConfiguration {
                reason: reason.to_string(),
            })
        };

        if self.num_volumes == 0 || self.size == 0 || self.channels == 0 {
            return invalid("num_volumes, size and channels must be positive");
        }
        if !(self.noise_amplitude >= 0.0) {
            return invalid("noise_amplitude must be non-negative");
        }
        if !(self.min_radius_fraction > 0.0
            && self.min_radius_fraction <= self.max_radius_fraction
            && self.max_radius_fraction <= 0.5)
        {
            return invalid("radius fractions must satisfy 0 < min <= max <= 0.5");
        }
        if !(self.core_fraction > 0.0 && self.core_fraction < 1.0) {
            return invalid("core_fraction must lie in (0, 1)");
        }

        Ok(())
    }

    /// Generate the dataset. The same seed always yields the same volumes.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn generate(&self) -> DatasetResult<InMemoryVolumeDataset> {
        self.validate()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let items = (0..self.num_volumes)
            .map(|_| self.sample_volume(&mut rng))
            .collect();

        tracing::debug!(
            num_volumes = self.num_volumes,
            size = self.size,
            seed = self.seed,
            "generated synthetic volumes"
        );

        InMemoryVolumeDataset::new(items)
    }

    fn sample_volume(&self, rng: &mut StdRng) -> VolumeItem {
        let size = self.size as f32;
        let radius = rng.random_range(self.min_radius_fraction..=self.max_radius_fraction) * size;
        let core = radius * self.core_fraction;

        // Keep the sphere inside the volume.
        let low = radius.min(size / 2.0);
        let high = (size - radius).max(low);
        let center: [f32; 3] = std::array::from_fn(|_| rng.random_range(low..=high));

        let voxels = self.size * self.size * self.size;
        let mut task_1_labels = Vec::with_capacity(voxels);
        let mut task_2_labels = Vec::with_capacity(voxels);
        for z in 0..self.size {
            for y in 0..self.size {
                for x in 0..self.size {
                    let distance = [z, y, x]
                        .iter()
                        .zip(center)
                        .map(|(&i, c)| (i as f32 + 0.5 - c).powi(2))
                        .sum::<f32>()
                        .sqrt();
                    task_1_labels.push(if distance <= radius { 1.0 } else { 0.0 });
                    task_2_labels.push(if distance <= core { 1.0 } else { 0.0 });
                }
            }
        }

        let amplitude = self.noise_amplitude;
        let mut image = Vec::with_capacity(voxels * self.channels);
        for _ in 0..self.channels {
            image.extend(task_1_labels.iter().zip(&task_2_labels).map(|(&sphere, &inner)| {
                0.5 * (sphere + inner) + rng.random_range(-amplitude..=amplitude)
            }));
        }

        VolumeItem {
            image,
            task_1_labels,
            task_2_labels,
            channels: self.channels,
            depth: self.size,
            height: self.size,
            width: self.size,
        }
    }
}
