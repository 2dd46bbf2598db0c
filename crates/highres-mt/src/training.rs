use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::{
    config::Config,
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use highres_mt_model::{CategoricalSampling, HighResMtNetConfig, ModelConfig};
use highres_mt_train::{MultiTaskBatcher, SyntheticVolumeConfig};

use crate::backend::burn_backend_types::{InferenceDevice, TrainingBackend, NAME};

/// CLI arguments for the training subcommand.
#[derive(Debug)]
pub struct TrainingCliArgs {
    /// Path to the training configuration file.
    pub config_path: PathBuf,
    /// Optional model record to resume training from.
    pub resume_checkpoint: Option<PathBuf>,
}

impl TrainingCliArgs {
    pub fn new(config_path: impl Into<PathBuf>, resume_checkpoint: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            resume_checkpoint,
        }
    }
}

/// Training configuration for HighRes-MT, stored as JSON.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Model configuration.
    pub model: ModelConfig,

    /// Synthetic two-task volumes to train on.
    #[config(default = "SyntheticVolumeConfig::new()")]
    pub data: SyntheticVolumeConfig,

    /// Volumes held out from `data` for validation.
    #[config(default = 4)]
    pub num_validation: usize,

    #[config(default = 10)]
    pub num_epochs: usize,

    #[config(default = 2)]
    pub batch_size: usize,

    /// Data loader worker threads, `0` loads on the training thread.
    #[config(default = 2)]
    pub num_workers: usize,

    #[config(default = 1e-3)]
    pub learning_rate: f64,

    /// Random seed for the backend and for batch shuffling.
    #[config(default = 42)]
    pub seed: u64,

    /// Directory receiving the trained model and a copy of this configuration.
    #[config(default = "String::from(\"artifacts\")")]
    pub artifact_dir: String,
}

impl TrainingConfig {
    /// Loads a training configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&config_str)?;
        Ok(config)
    }

    /// Saves this configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let config_str = serde_json::to_string_pretty(self)?;
        fs::write(path, config_str)?;
        Ok(())
    }
}

/// Progress stored next to the saved model so a resumed run continues the
/// temperature schedule. Optimizer moments are not stored and restart.
#[derive(Config, Debug)]
pub struct TrainingState {
    /// Optimizer steps taken so far.
    pub iteration: usize,
}

/// File holding the [`TrainingState`] in the artifact directory.
const STATE_FILE: &str = "state.json";

/// Iteration a run resumed from `checkpoint` starts at.
fn resume_iteration(checkpoint: &Path) -> Result<usize> {
    let state_path = checkpoint.with_file_name(STATE_FILE);
    if !state_path.exists() {
        tracing::warn!(
            state = %state_path.display(),
            "no training state next to checkpoint, temperature schedule restarts"
        );
        return Ok(0);
    }

    let state = TrainingState::load(&state_path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", state_path.display()))?;
    Ok(state.iteration)
}

/// Mean losses of one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
    /// Gumbel temperature reached at the end of the epoch.
    pub temperature: f64,
}

/// Runs the training loop on a specific device.
///
/// Every iteration samples the categorical groupings at the annealed
/// Gumbel temperature; validation uses deterministic groupings. The final
/// model is written to `<artifact_dir>/model` with a [`CompactRecorder`] and
/// the iteration count to `<artifact_dir>/state.json`. Resuming reads the
/// state file next to the checkpoint.
///
/// # Errors
///
/// Returns an error if data generation, model initialization, a forward
/// pass or saving the artifacts fails.
pub fn run_training_on_device<B: AutodiffBackend>(
    device: B::Device,
    config: &TrainingConfig,
    resume_checkpoint: Option<&Path>,
) -> Result<Vec<EpochMetrics>> {
    tracing::info!(?device, "initializing HighRes-MT training");

    B::seed(config.seed);

    let (train_set, valid_set) = config
        .data
        .generate()?
        .split_off(config.num_validation)
        .context("not enough synthetic volumes for the validation split")?;

    let mut model = HighResMtNetConfig::new(config.model.clone()).init::<B>(&device)?;
    let mut iteration = 0;
    if let Some(checkpoint) = resume_checkpoint {
        tracing::info!(checkpoint = %checkpoint.display(), "loading model record");
        model = model
            .load_file(checkpoint, &CompactRecorder::new(), &device)
            .map_err(|e| anyhow::anyhow!("failed to load checkpoint: {e}"))?;
        iteration = resume_iteration(checkpoint)?;
        tracing::info!(iteration, "resuming temperature schedule");
    }
    tracing::debug!(summary = %model.summary(), "model created");

    let mut optimizer = AdamConfig::new().init();

    let mut train_builder = DataLoaderBuilder::new(MultiTaskBatcher::<B>::new())
        .batch_size(config.batch_size)
        .shuffle(config.seed);
    let mut valid_builder =
        DataLoaderBuilder::new(MultiTaskBatcher::<B::InnerBackend>::new()).batch_size(config.batch_size);
    if config.num_workers > 0 {
        train_builder = train_builder.num_workers(config.num_workers);
        valid_builder = valid_builder.num_workers(config.num_workers);
    }
    let train_loader = train_builder.build(train_set);
    let valid_loader = valid_builder.build(valid_set);

    tracing::info!(epochs = config.num_epochs, "starting training");

    let mut history = Vec::with_capacity(config.num_epochs);
    for epoch in 1..=config.num_epochs {
        let mut train_loss = 0.0;
        let mut train_batches = 0_u32;
        for batch in train_loader.iter() {
            let sampling = model.training_sampling(iteration);
            let output = model.forward_loss(batch, sampling)?;
            train_loss += output.loss.clone().into_scalar().elem::<f64>();
            train_batches += 1;

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(config.learning_rate, model, grads);
            iteration += 1;
        }

        let model_valid = model.valid();
        let mut valid_loss = 0.0;
        let mut valid_batches = 0_u32;
        for batch in valid_loader.iter() {
            let output = model_valid.forward_loss(batch, CategoricalSampling::Deterministic)?;
            valid_loss += output.loss.into_scalar().elem::<f64>();
            valid_batches += 1;
        }

        let metrics = EpochMetrics {
            epoch,
            train_loss: train_loss / f64::from(train_batches.max(1)),
            valid_loss: valid_loss / f64::from(valid_batches.max(1)),
            temperature: config.model.annealing.temperature(iteration),
        };
        tracing::info!(
            epoch,
            train_loss = metrics.train_loss,
            valid_loss = metrics.valid_loss,
            temperature = metrics.temperature,
            "epoch finished",
        );
        history.push(metrics);
    }

    let artifact_dir = Path::new(&config.artifact_dir);
    fs::create_dir_all(artifact_dir)
        .with_context(|| format!("failed to create {}", artifact_dir.display()))?;
    config.save(artifact_dir.join("config.json"))?;
    TrainingState::new(iteration)
        .save(artifact_dir.join(STATE_FILE))
        .context("failed to save training state")?;
    model
        .save_file(artifact_dir.join("model"), &CompactRecorder::new())
        .map_err(|e| anyhow::anyhow!("failed to save final model: {e}"))?;

    tracing::info!(artifact_dir = %artifact_dir.display(), "training completed successfully");
    Ok(history)
}

/// Runs HighRes-MT training from a CLI configuration.
///
/// # Errors
///
/// Returns an error if the configuration or checkpoint file is missing,
/// the configuration cannot be parsed, or training fails.
pub fn run_training(args: TrainingCliArgs) -> Result<Vec<EpochMetrics>> {
    tracing::info!(config = %args.config_path.display(), "HighRes-MT training initialization");

    if !args.config_path.exists() {
        anyhow::bail!(
            "Configuration file not found: {}",
            args.config_path.display()
        );
    }
    if let Some(checkpoint) = &args.resume_checkpoint {
        if !checkpoint.exists() {
            anyhow::bail!("Checkpoint file not found: {}", checkpoint.display());
        }
    }

    let training_config = TrainingConfig::load(&args.config_path)
        .with_context(|| format!("failed to parse {}", args.config_path.display()))?;

    tracing::info!(
        num_classes = training_config.model.num_classes,
        loss = training_config.model.loss_type.name(),
        learning_rate = training_config.learning_rate,
        batch_size = training_config.batch_size,
        epochs = training_config.num_epochs,
        "configuration loaded",
    );

    tracing::info!(backend = NAME, "starting training on backend");
    run_training_on_device::<TrainingBackend>(
        InferenceDevice::default(),
        &training_config,
        args.resume_checkpoint.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use burn::backend::{ndarray::NdArray, Autodiff};
    use highres_mt_model::{ConvSpec, LayerSpecs, ResidualSpec};

    use super::*;

    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn tiny_config(artifact_dir: &Path) -> TrainingConfig {
        let layers = LayerSpecs::new()
            .with_conv_0(ConvSpec::new("conv_0".to_string(), 4, 3))
            .with_residual(vec![
                ResidualSpec::new("res_1".to_string(), 4).with_repeat(1),
                ResidualSpec::new("res_2".to_string(), 6)
                    .with_repeat(1)
                    .with_dilation(2),
            ])
            .with_conv_1(ConvSpec::new("conv_1".to_string(), 6, 1));
        let data = SyntheticVolumeConfig::new()
            .with_num_volumes(3)
            .with_size(8)
            .with_min_radius_fraction(0.25);

        TrainingConfig::new(ModelConfig::new(2).with_layers(layers))
            .with_data(data)
            .with_num_validation(1)
            .with_num_epochs(2)
            .with_batch_size(1)
            .with_num_workers(0)
            .with_artifact_dir(artifact_dir.display().to_string())
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("highres-mt-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn config_json_round_trip() {
        let dir = scratch_dir("config");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("training.json");

        let config = tiny_config(&dir).with_learning_rate(5e-4);
        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();

        assert_eq!(loaded.learning_rate, 5e-4);
        assert_eq!(loaded.model.layers.residual.len(), 2);
        assert_eq!(loaded.data.size, 8);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn training_runs_and_writes_artifacts() {
        let dir = scratch_dir("train");
        let config = tiny_config(&dir);

        let history =
            run_training_on_device::<TestAutodiffBackend>(Default::default(), &config, None)
                .unwrap();

        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|m| m.train_loss.is_finite() && m.valid_loss.is_finite()));
        assert!(history[1].temperature < history[0].temperature);
        assert!(dir.join("config.json").exists());
        let saved_model = fs::read_dir(&dir)
            .unwrap()
            .filter_map(Result::ok)
            .any(|entry| entry.file_name().to_string_lossy().starts_with("model."));
        assert!(saved_model);
        // Two training volumes at batch size 1 for two epochs.
        let state = TrainingState::load(dir.join(STATE_FILE)).unwrap();
        assert_eq!(state.iteration, 4);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resumed_training_continues_temperature_schedule() {
        let dir = scratch_dir("resume");
        let config = tiny_config(&dir).with_num_epochs(1);
        run_training_on_device::<TestAutodiffBackend>(Default::default(), &config, None).unwrap();

        let checkpoint = dir.join("model");
        let history = run_training_on_device::<TestAutodiffBackend>(
            Default::default(),
            &config,
            Some(&checkpoint),
        )
        .unwrap();

        let expected = config.model.annealing.temperature(4);
        assert!((history[0].temperature - expected).abs() < 1e-12);
        assert_eq!(TrainingState::load(dir.join(STATE_FILE)).unwrap().iteration, 4);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn run_training_rejects_missing_files() {
        let missing = TrainingCliArgs::new("/nonexistent/training.json", None);
        assert!(run_training(missing).is_err());
    }
}
