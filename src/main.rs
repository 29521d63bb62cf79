//! tweetwash CLI - normalize tweets and classify them

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tweetwash::{PipelineConfig, Preprocessor, SentimentClassifier, VERSION};

/// tweetwash - tweet normalization and offensive-language classification
#[derive(Parser, Debug)]
#[command(name = "tweetwash")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use CPU even if a GPU is available
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalize one tweet and print the result
    Preprocess {
        /// Tweet text to normalize
        #[arg(short, long)]
        text: String,

        /// Path to pipeline config file
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Normalize one tweet, then classify it
    Classify {
        /// Tweet text to classify
        #[arg(short, long)]
        text: String,

        /// Path to pipeline config file
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Show the parsed pipeline configuration
    Info {
        /// Path to pipeline config file
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb
}

fn load_pipeline(config_path: &PathBuf, force_cpu: bool) -> Result<(PipelineConfig, Preprocessor)> {
    let config = PipelineConfig::load(config_path)?;
    let device = if force_cpu {
        candle_core::Device::Cpu
    } else {
        config.device()?
    };

    let pb = create_progress_bar("Loading pipeline...");
    let pipeline = Preprocessor::from_config(&config, &device)?;
    pb.finish_with_message("Pipeline ready");

    Ok((config, pipeline))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!("tweetwash v{}", VERSION);

    match cli.command {
        Commands::Preprocess { text, config } => {
            let (_, pipeline) = load_pipeline(&config, cli.cpu)?;
            let normalized = pipeline
                .preprocess(&text)
                .context("preprocessing failed")?;
            println!("{}", normalized);
            Ok(())
        }

        Commands::Classify { text, config } => {
            let (config, pipeline) = load_pipeline(&config, cli.cpu)?;
            let section = config
                .classifier
                .as_ref()
                .context("config has no classifier section")?;
            let device = if cli.cpu {
                candle_core::Device::Cpu
            } else {
                config.device()?
            };

            let pb = create_progress_bar("Loading classifier...");
            let classifier =
                SentimentClassifier::load(&section.model_dir, &device, section.threshold)?;
            pb.finish_with_message("Classifier ready");

            let normalized = pipeline
                .preprocess(&text)
                .context("preprocessing failed")?;
            let decision = classifier.classify(&normalized)?;

            info!("Normalized: {}", normalized);
            println!("Model classified text as: {}: {}", decision.index(), decision.label());
            Ok(())
        }

        Commands::Info { config } => {
            info!("Loading config from {:?}", config);

            if config.exists() {
                let cfg = PipelineConfig::load(&config).context("Failed to load config")?;
                println!("{:#?}", cfg);
            } else {
                eprintln!("Config file not found: {:?}", config);
            }

            Ok(())
        }
    }
}
