use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use highres_mt::{
    burn_backend_types::{InferenceBackend, InferenceDevice, NAME},
    loss::LossType,
    model::HighResMtNetConfig,
    training::{run_training, TrainingCliArgs, TrainingConfig},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "highres-mt")]
#[command(
    about = "HighRes-MT: multi-task 3D segmentation with learned categorical group convolutions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a HighRes-MT model
    Train {
        /// Training configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Resume from a saved model record
        #[arg(short, long)]
        resume: Option<PathBuf>,
    },

    /// Print the layer table of the model described by a training configuration
    Summary {
        /// Training configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Write a default training configuration
    InitConfig {
        /// Destination file
        #[arg(short, long, default_value = "training.json")]
        output: PathBuf,

        /// Number of segmentation classes per task
        #[arg(short, long, default_value_t = 2)]
        num_classes: usize,
    },

    /// Show backend information
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .try_init()
        .context("failed to initialise logging")?;

    let cli = Cli::parse();
    let device = InferenceDevice::default();

    match cli.command {
        Commands::Train { config, resume } => {
            run_training(TrainingCliArgs::new(config, resume))?;
            Ok(())
        }

        Commands::Summary { config } => {
            let training_config = TrainingConfig::load(&config)
                .with_context(|| format!("failed to load {}", config.display()))?;
            let model = HighResMtNetConfig::new(training_config.model)
                .init::<InferenceBackend>(&device)?;
            println!("{}", model.summary());
            Ok(())
        }

        Commands::InitConfig {
            output,
            num_classes,
        } => {
            let training_config =
                TrainingConfig::new(highres_mt::model::ModelConfig::new(num_classes));
            training_config.save(&output)?;
            tracing::info!(path = %output.display(), "wrote default training configuration");
            Ok(())
        }

        Commands::Info => {
            println!("HighRes-MT Information:");
            println!("  Backend: {NAME}");
            println!("  Device: {device:?}");
            let losses: Vec<_> = LossType::ALL.iter().map(LossType::name).collect();
            println!("  Loss types: {}", losses.join(", "));
            Ok(())
        }
    }
}
