// This module trains the topic classifier. `run` drives a whole experiment:
// it reads the three corpus splits, loads the pretrained vectors for the
// training vocabulary, builds the embedding matrix and the model, trains with
// SGD while evaluating every epoch on the validation split, and finally writes
// the test predictions and the final checkpoint into the artifact directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use burn::{
    config::Config,
    data::dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer, SgdConfig},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use rand::{rngs::StdRng, SeedableRng};

use crate::checkpoint::{CheckpointKind, CheckpointManager};
use crate::data_processing::{
    Corpus, CorpusPaths, EmbeddingFormat, EmbeddingMatrix, LoadOptions, TopicBatcher,
    TopicDataset, TopicTrainingBatch, WordVectors,
};
use crate::inference;
use crate::metrics::{accuracy, EpochMetrics, MetricsLogger};
use crate::model::{TopicCnn, TopicCnnConfig};

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: SgdConfig,
    pub kernel_sizes: Vec<usize>,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 50)]
    pub batch_size: usize,
    #[config(default = 1.0e-2)]
    pub learning_rate: f64,
    #[config(default = 300)]
    pub embedding_size: usize,
    #[config(default = 50)]
    pub num_filters: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
    /// Half-width of the uniform range for words without a pretrained vector.
    #[config(default = 0.25)]
    pub oov_scale: f32,
    #[config(default = 42)]
    pub seed: u64,
    /// Forget the best validation accuracy at the start of every epoch, so any
    /// epoch with a non-zero accuracy overwrites the best checkpoint. Turn off
    /// to keep only the best epoch of the whole run.
    #[config(default = true)]
    pub reset_best_each_epoch: bool,
}

impl TrainingConfig {
    /// Defaults: SGD, kernel widths 3, 4 and 5.
    pub fn topic_classification() -> Self {
        Self::new(SgdConfig::new(), vec![3, 4, 5])
    }

    pub fn model_config(&self, n_words: usize, n_classes: usize) -> TopicCnnConfig {
        TopicCnnConfig::new(n_words, n_classes, self.kernel_sizes.clone())
            .with_embedding_size(self.embedding_size)
            .with_num_filters(self.num_filters)
            .with_dropout(self.dropout)
    }
}

/// Where and how to read the pretrained word vectors.
#[derive(Debug, Clone)]
pub struct EmbeddingSource {
    pub path: PathBuf,
    pub format: EmbeddingFormat,
    pub limit: Option<usize>,
}

/// Best validation accuracy seen so far.
#[derive(Debug, Clone)]
pub struct BestAccuracy {
    best: f64,
    reset_each_epoch: bool,
}

impl BestAccuracy {
    pub fn new(reset_each_epoch: bool) -> Self {
        Self {
            best: 0.0,
            reset_each_epoch,
        }
    }

    pub fn start_epoch(&mut self) {
        if self.reset_each_epoch {
            self.best = 0.0;
        }
    }

    /// Records `accuracy` and returns true if it beats the best so far.
    pub fn update(&mut self, accuracy: f64) -> bool {
        if accuracy > self.best {
            self.best = accuracy;
            return true;
        }
        false
    }

    pub fn value(&self) -> f64 {
        self.best
    }
}

#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs: Vec<EpochMetrics>,
    pub best_accuracy: f64,
    pub predictions: usize,
    pub artifact_dir: PathBuf,
}

pub fn run<B: AutodiffBackend>(
    device: B::Device,
    embeddings: &EmbeddingSource,
    paths: &CorpusPaths,
    config: TrainingConfig,
    artifact_dir: impl AsRef<Path>,
) -> crate::Result<TrainingSummary> {
    B::seed(config.seed);
    let checkpoints = CheckpointManager::new(artifact_dir.as_ref())?;
    checkpoints.save_config(&config)?;

    let corpus = Corpus::load(paths)?;

    // Only the training vocabulary can ever be looked up.
    let keep = |word: &str| corpus.vocab.contains(word);
    let options = LoadOptions::default()
        .with_limit(embeddings.limit)
        .restricted_to(&keep);
    let vectors = WordVectors::load(&embeddings.path, embeddings.format, &options)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let matrix = EmbeddingMatrix::build(
        &corpus.vocab,
        &vectors,
        config.embedding_size,
        config.oov_scale,
        &mut rng,
    )?;
    drop(vectors);

    let model_config = config.model_config(corpus.vocab.len(), corpus.labels.len());
    checkpoints.save_model_config(&model_config)?;
    checkpoints.save_tables(&corpus.vocab, &corpus.labels)?;
    let model = model_config.init_with_embeddings::<B>(&matrix, &device);
    drop(matrix);
    tracing::info!(
        "Model ready: {} words, {} classes, kernels {:?}",
        model_config.n_words,
        model_config.n_classes,
        model_config.kernel_sizes
    );

    let metrics = MetricsLogger::create(checkpoints.metrics_path())?;
    let (model, best_accuracy, epochs) = train(
        model,
        &corpus,
        &config,
        model_config.min_seq_length(),
        &checkpoints,
        &metrics,
        &device,
    )?;

    let predictions = inference::predict_each(
        &model.valid(),
        &corpus.test,
        model_config.min_seq_length(),
        &device,
    );
    inference::export_predictions(checkpoints.predictions_path(), &predictions, &corpus.labels)?;
    tracing::info!(
        "Wrote {} predictions to {}",
        predictions.len(),
        checkpoints.predictions_path().display()
    );

    checkpoints.save_model(&model, CheckpointKind::Final)?;
    tracing::info!("Training complete, artifacts in {}", checkpoints.dir().display());

    Ok(TrainingSummary {
        epochs,
        best_accuracy,
        predictions: predictions.len(),
        artifact_dir: checkpoints.dir().to_path_buf(),
    })
}

/// Epoch loop. Returns the final model, the best validation accuracy and the
/// metrics of every epoch.
pub fn train<B: AutodiffBackend>(
    mut model: TopicCnn<B>,
    corpus: &Corpus,
    config: &TrainingConfig,
    min_seq_length: usize,
    checkpoints: &CheckpointManager,
    metrics: &MetricsLogger,
    device: &B::Device,
) -> crate::Result<(TopicCnn<B>, f64, Vec<EpochMetrics>)> {
    let mut optim = config.optimizer.init();

    let batcher_train = TopicBatcher::<B>::new(device.clone(), min_seq_length);
    let batcher_valid = TopicBatcher::<B::InnerBackend>::new(device.clone(), min_seq_length);

    let dataloader_train: Arc<dyn DataLoader<TopicTrainingBatch<B>>> =
        DataLoaderBuilder::new(batcher_train)
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .build(TopicDataset::new(corpus.train.clone()));

    let mut best = BestAccuracy::new(config.reset_best_each_epoch);
    let mut history = Vec::with_capacity(config.num_epochs);

    println!("started training");
    for epoch in 0..config.num_epochs {
        best.start_epoch();
        let start = Instant::now();
        let mut train_loss = 0.0;
        let mut train_correct = 0;

        for batch in dataloader_train.iter() {
            let output = model.forward_classification(batch);
            train_correct += count_correct(output.output.clone(), output.targets.clone());
            train_loss += output.loss.clone().into_scalar().elem::<f64>();

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        let train_examples = corpus.train.len();
        let seconds = start.elapsed().as_secs_f64();
        let train_loss = train_loss / train_examples as f64;
        let train_accuracy = accuracy(train_correct, train_examples);
        println!(
            "epoch {epoch}: train loss/sent={train_loss:.4}, acc={train_accuracy:.4}, time={seconds:.2}s"
        );

        // Validation: one example at a time, no mask, dropout off.
        let model_valid = model.valid();
        let valid_correct = corpus
            .valid
            .iter()
            .filter(|item| {
                let batch = batcher_valid.batch(vec![item.tokens.clone()]);
                model_valid.predict(batch).first() == Some(&item.label)
            })
            .count();
        let valid_accuracy = accuracy(valid_correct, corpus.valid.len());

        if keep_if_best(&model, valid_accuracy, &mut best, checkpoints)? {
            tracing::info!("Epoch {epoch}: new best validation accuracy {valid_accuracy:.4}");
        }
        println!("iter {epoch}: test acc={valid_accuracy:.4}");

        let row = EpochMetrics::new(epoch, train_loss, train_accuracy, valid_accuracy, seconds);
        metrics.log(&row)?;
        history.push(row);
    }

    Ok((model, best.value(), history))
}

/// Saves `model` as the best checkpoint if `accuracy` beats the best so far.
fn keep_if_best<B: Backend>(
    model: &TopicCnn<B>,
    accuracy: f64,
    best: &mut BestAccuracy,
    checkpoints: &CheckpointManager,
) -> crate::Result<bool> {
    if !best.update(accuracy) {
        return Ok(false);
    }
    checkpoints.save_model(model, CheckpointKind::Best)?;
    Ok(true)
}

/// Number of rows whose arg-max matches the target.
fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    logits
        .argmax(1)
        .reshape([batch_size])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}
