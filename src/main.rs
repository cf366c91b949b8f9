//! SN-GAN training on CIFAR-10
//!
//! Main entry point providing CLI interface for:
//! - Training the GAN, optionally resuming from a checkpoint
//! - Sampling an image grid from a trained checkpoint
//! - Writing a default configuration file

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

use sngan_cifar10::{
    data::{from_cifar_dir, BatchSource},
    eval::{image_grid, Evaluator, InceptionEvaluator},
    model::SnGan,
    training::Trainer,
    utils::{find_latest_checkpoint, load_checkpoint, Config, DirCheckpointer},
};

/// Residual SN-GAN for CIFAR-10
#[derive(Parser)]
#[command(name = "sngan")]
#[command(version = "0.1.0")]
#[command(about = "Train spectrally normalized residual GANs on CIFAR-10")]
struct Cli {
    /// Path to configuration file (.toml or .json)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the GAN
    Train {
        /// Override the number of outer iterations
        #[arg(long)]
        max_iters: Option<usize>,

        /// Resume from a checkpoint directory, or `latest` under the results path
        #[arg(long)]
        resume: Option<String>,
    },

    /// Generate an image grid from a checkpoint
    Sample {
        /// Checkpoint directory
        #[arg(short, long)]
        checkpoint: String,

        /// Number of images
        #[arg(short, long, default_value = "64")]
        num_samples: i64,

        /// Images per grid row
        #[arg(long, default_value = "8")]
        nrow: i64,

        /// Output image path
        #[arg(short, long, default_value = "samples.png")]
        output: String,
    },

    /// Initialize default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train { max_iters, resume } => {
            let mut config = load_config(&cli.config)?;
            if let Some(max_iters) = max_iters {
                config.training.max_iters = max_iters;
            }
            config.validate()?;

            let results_path = PathBuf::from(&config.training.results_path);
            std::fs::create_dir_all(&results_path)?;
            init_logging(&cli.verbosity, Some(&results_path.join("training.log")))?;
            log_config_source(&cli.config);

            train(config, resume)?;
        }
        Commands::Sample {
            checkpoint,
            num_samples,
            nrow,
            output,
        } => {
            init_logging(&cli.verbosity, None)?;
            log_config_source(&cli.config);
            let config = load_config(&cli.config)?;
            sample(&config, &checkpoint, num_samples, nrow, &output)?;
        }
        Commands::Init { output } => {
            init_logging(&cli.verbosity, None)?;
            Config::default().save(&output)?;
            info!("Created default configuration at {}", output);
        }
    }

    Ok(())
}

/// Stdout logging at `verbosity`, plus a plain-text DEBUG log in `log_file`
/// when given
fn init_logging(verbosity: &str, log_file: Option<&Path>) -> Result<()> {
    let level = match verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(LevelFilter::from_level(level)),
        )
        .with(file_layer)
        .try_init()?;
    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::load(path)
    } else {
        Ok(Config::default())
    }
}

fn log_config_source(path: &str) {
    if Path::new(path).exists() {
        info!("Using configuration {}", path);
    } else {
        warn!("Config file {} not found, using defaults", path);
    }
}

fn train(config: Config, resume: Option<String>) -> Result<()> {
    let device = config.get_device();
    let training = &config.training;
    let results_path = PathBuf::from(&training.results_path);

    let mut loader = from_cifar_dir(&training.sn_gan_data_path, training.data_batch_size, device)?
        .subsample(training.subsample)?;
    if let Some(seed) = training.seed {
        loader = loader.with_seed(seed as u64);
    }

    let n_classes = config.n_classes(loader.n_classes());
    let mut gan = SnGan::new(
        config.generator_config(n_classes),
        config.discriminator_config(n_classes),
        device,
    );

    let mut trainer = Trainer::new(training.clone(), device)?;

    let resume_dir = match resume.as_deref() {
        Some("latest") => find_latest_checkpoint(&results_path),
        Some(dir) => Some(PathBuf::from(dir)),
        None => None,
    };
    match (resume.as_deref(), resume_dir) {
        (_, Some(dir)) => {
            let (meta, metrics) = load_checkpoint(&mut gan, &dir)?;
            info!("Resuming after iteration {}", meta.iteration);
            trainer = trainer.resume_from(meta.iteration + 1, metrics);
        }
        (Some(_), None) => warn!("No checkpoint found under {}", results_path.display()),
        (None, None) => {}
    }

    config.save_toml(&results_path.join("config.toml").to_string_lossy())?;

    let mut evaluator = match &training.inception_model {
        Some(path) => Some(
            InceptionEvaluator::load(path, device)?.with_batch_size(training.eval_batch_size),
        ),
        None => {
            warn!("No inception_model configured, Inception Score is skipped");
            None
        }
    };
    let mut checkpointer = DirCheckpointer::new(&results_path);

    trainer.train(
        &mut gan,
        &mut loader,
        evaluator.as_mut().map(|e| e as &mut dyn Evaluator),
        &mut checkpointer,
    )?;

    let gen_path = results_path.join("generator_final.ot");
    let dis_path = results_path.join("discriminator_final.ot");
    gan.save(&gen_path.to_string_lossy(), &dis_path.to_string_lossy())?;
    info!("Saved final weights to {}", results_path.display());

    Ok(())
}

fn sample(
    config: &Config,
    checkpoint: &str,
    num_samples: i64,
    nrow: i64,
    output: &str,
) -> Result<()> {
    let device = config.get_device();
    // CIFAR-10
    let n_classes = config.n_classes(10);
    let mut gan = SnGan::new(
        config.generator_config(n_classes),
        config.discriminator_config(n_classes),
        device,
    );
    let (meta, _) = load_checkpoint(&mut gan, Path::new(checkpoint))?;
    info!("Loaded model from iteration {}", meta.iteration);

    let images = gan.generate(num_samples)?;
    tch::vision::image::save(&image_grid(&images, nrow), output)?;
    info!("Saved {} samples to {}", num_samples, output);

    Ok(())
}
