use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use clap::{Args, Parser, Subcommand, ValueEnum};

use topic_cnn::checkpoint::load_config;
use topic_cnn::data_processing::{CorpusPaths, EmbeddingFormat};
use topic_cnn::inference;
use topic_cnn::training::{self, EmbeddingSource, TrainingConfig};

/// Topic classification with a CNN over pretrained word embeddings.
#[derive(Parser, Debug)]
#[command(name = "topic-cnn", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train on the corpus, then write test predictions and checkpoints
    Train(TrainArgs),

    /// Classify text with a trained run
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Pretrained word2vec table
    #[arg(long, default_value = "GoogleNews-vectors-negative300.bin")]
    embeddings: PathBuf,

    /// Layout of the word2vec table
    #[arg(long, value_enum, default_value_t = TableFormat::Binary)]
    embeddings_format: TableFormat,

    /// Read only the first N vectors of the table
    #[arg(long)]
    embeddings_limit: Option<usize>,

    #[arg(long, default_value = "topicclass_train.txt")]
    train: PathBuf,

    #[arg(long, default_value = "topicclass_valid.txt")]
    valid: PathBuf,

    #[arg(long, default_value = "topicclass_test.txt")]
    test: PathBuf,

    /// Directory for checkpoints, tables, metrics and predictions
    #[arg(long, default_value = "artifacts")]
    artifact_dir: PathBuf,

    /// JSON training config; the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Keep the best validation accuracy across epochs instead of resetting
    /// it at the start of every epoch
    #[arg(long)]
    keep_best_across_epochs: bool,
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Directory written by `train`
    #[arg(long, default_value = "artifacts")]
    artifact_dir: PathBuf,

    /// Texts to classify
    #[arg(required = true)]
    texts: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TableFormat {
    Binary,
    Text,
}

impl From<TableFormat> for EmbeddingFormat {
    fn from(format: TableFormat) -> Self {
        match format {
            TableFormat::Binary => EmbeddingFormat::Binary,
            TableFormat::Text => EmbeddingFormat::Text,
        }
    }
}

impl TrainArgs {
    fn training_config(&self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => load_config::<TrainingConfig>(path)
                .with_context(|| format!("cannot load training config {}", path.display()))?,
            None => TrainingConfig::topic_classification(),
        };
        if let Some(epochs) = self.epochs {
            config.num_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.keep_best_across_epochs {
            config.reset_best_each_epoch = false;
        }
        Ok(config)
    }
}

fn launch<B: AutodiffBackend>(device: B::Device, cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Train(args) => {
            let config = args.training_config()?;
            let embeddings = EmbeddingSource {
                path: args.embeddings.clone(),
                format: args.embeddings_format.into(),
                limit: args.embeddings_limit,
            };
            let paths = CorpusPaths::new(args.train.clone(), args.valid.clone(), args.test.clone());

            let summary = training::run::<B>(device, &embeddings, &paths, config, &args.artifact_dir)
                .context("training failed")?;
            println!(
                "best validation accuracy {:.4}, {} test predictions in {}",
                summary.best_accuracy,
                summary.predictions,
                summary.artifact_dir.display()
            );
        }
        Commands::Predict(args) => {
            let predictions =
                inference::infer::<B::InnerBackend>(device, args.artifact_dir.clone(), args.texts)
                    .with_context(|| format!("cannot classify with {}", args.artifact_dir.display()))?;
            for (i, prediction) in predictions.iter().enumerate() {
                println!(
                    "\n=== Item {i} ===\n- Text: {}\n- Logits: {:?}\n- Prediction: {}\n================",
                    prediction.text, prediction.logits, prediction.label
                );
            }
        }
    }
    Ok(())
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use crate::{launch, Cli};
    use burn::backend::wgpu::{Wgpu, WgpuDevice};
    use burn::backend::Autodiff;

    pub fn run(cli: Cli) -> anyhow::Result<()> {
        launch::<Autodiff<Wgpu>>(WgpuDevice::default(), cli)
    }
}

#[cfg(all(feature = "ndarray", not(feature = "wgpu")))]
mod ndarray {
    use crate::{launch, Cli};
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    use burn::backend::Autodiff;

    pub fn run(cli: Cli) -> anyhow::Result<()> {
        launch::<Autodiff<NdArray>>(NdArrayDevice::Cpu, cli)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("topic_cnn=info")),
        )
        .init();

    let cli = Cli::parse();

    #[cfg(feature = "wgpu")]
    return wgpu::run(cli);

    #[cfg(all(feature = "ndarray", not(feature = "wgpu")))]
    return ndarray::run(cli);

    #[cfg(not(any(feature = "ndarray", feature = "wgpu")))]
    {
        drop(cli);
        anyhow::bail!("built without a backend, enable the `ndarray` or `wgpu` feature")
    }
}
