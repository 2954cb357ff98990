// This module runs a trained classifier over unlabeled sequences. Each
// sequence is classified on its own (batch of one, no mask), the predicted
// ids are mapped back to label strings and written one per line. `infer`
// rebuilds a model from a saved run directory and classifies raw text.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::{data::dataloader::batcher::Batcher, tensor::backend::Backend};

use crate::checkpoint::{CheckpointKind, CheckpointManager};
use crate::data_processing::{LabelSet, TopicBatcher, TopicInferenceBatch, Tokenizer};
use crate::error::{Error, Result};
use crate::model::{predicted_classes, TopicCnn};

/// Predicted class id of every sequence, in input order.
pub fn predict_each<B: Backend>(
    model: &TopicCnn<B>,
    sequences: &[Vec<usize>],
    min_seq_length: usize,
    device: &B::Device,
) -> Vec<usize> {
    let batcher = TopicBatcher::<B>::new(device.clone(), min_seq_length);
    sequences
        .iter()
        .flat_map(|sequence| {
            let batch: TopicInferenceBatch<B> = batcher.batch(vec![sequence.clone()]);
            model.predict(batch)
        })
        .collect()
}

/// Writes the label of every prediction, one per line.
pub fn export_predictions(
    path: impl AsRef<Path>,
    predictions: &[usize],
    labels: &LabelSet,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(Error::io(path))?;
    let mut writer = BufWriter::new(file);

    for &class in predictions {
        let label = labels.name(class).ok_or_else(|| Error::Checkpoint {
            path: path.to_path_buf(),
            reason: format!("predicted class {class} has no label ({} known)", labels.len()),
        })?;
        writeln!(writer, "{label}").map_err(Error::io(path))?;
    }

    writer.flush().map_err(Error::io(path))
}

/// Classification of one input text.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub text: String,
    pub label: String,
    pub logits: Vec<f32>,
}

/// Checkpoint `infer` loads: the best one when there is one, the final one
/// otherwise.
pub fn preferred_checkpoint<B: Backend>(checkpoints: &CheckpointManager) -> CheckpointKind {
    if checkpoints.has_model::<B>(CheckpointKind::Best) {
        CheckpointKind::Best
    } else {
        CheckpointKind::Final
    }
}

/// Classifies raw text samples with the model saved in `artifact_dir`.
pub fn infer<B: Backend>(
    device: B::Device,
    artifact_dir: impl Into<PathBuf>,
    samples: Vec<String>,
) -> Result<Vec<Prediction>> {
    let checkpoints = CheckpointManager::open(artifact_dir)?;
    let model_config = checkpoints.load_model_config()?;
    let (vocab, labels) = checkpoints.load_tables()?;

    let kind = preferred_checkpoint::<B>(&checkpoints);
    tracing::info!("Loading {:?} checkpoint from {}", kind, checkpoints.dir().display());
    let model = checkpoints.load_model(model_config.init::<B>(&device), kind, &device)?;

    let batcher = TopicBatcher::<B>::new(device, model_config.min_seq_length());
    samples
        .into_iter()
        .map(|text| {
            let batch: TopicInferenceBatch<B> = batcher.batch(vec![vocab.encode(&text)]);
            let scores = model.forward(batch.tokens, None);
            let class = predicted_classes(scores.clone())
                .first()
                .copied()
                .unwrap_or_default();
            let label = labels
                .name(class)
                .ok_or_else(|| Error::Checkpoint {
                    path: checkpoints.dir().to_path_buf(),
                    reason: format!("predicted class {class} has no label"),
                })?
                .to_string();
            Ok(Prediction {
                text,
                label,
                logits: scores.into_data().iter::<f32>().collect(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_processing::{LabelSetBuilder, OpenVocabulary, Vocabulary};
    use crate::model::TopicCnnConfig;
    use burn::backend::NdArray;
    use std::fs;

    type TestBackend = NdArray;

    fn labels() -> LabelSet {
        let mut labels = LabelSetBuilder::new();
        labels.id_or_insert("sports");
        labels.id_or_insert("music");
        labels.freeze()
    }

    #[test]
    fn writes_one_label_per_prediction_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("op.txt");

        export_predictions(&path, &[1, 0, 0, 1], &labels()).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, "music\nsports\nsports\nmusic\n");
    }

    #[test]
    fn unknown_class_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = export_predictions(dir.path().join("op.txt"), &[5], &labels()).unwrap_err();
        assert!(matches!(err, Error::Checkpoint { .. }));
    }

    #[test]
    fn predicts_each_sequence_once() {
        let device = Default::default();
        let model = TopicCnnConfig::new(8, 2, vec![2, 3])
            .with_embedding_size(4)
            .with_num_filters(3)
            .init::<TestBackend>(&device);
        let sequences = vec![vec![2, 3, 4], vec![], vec![5, 6, 7, 2, 3, 4, 5]];

        let predictions = predict_each(&model, &sequences, 3, &device);

        assert_eq!(predictions.len(), sequences.len());
        assert!(predictions.iter().all(|&class| class < 2));
    }

    fn saved_run(dir: &Path) -> (CheckpointManager, TopicCnnConfig, Vocabulary) {
        let checkpoints = CheckpointManager::new(dir).unwrap();
        let config = TopicCnnConfig::new(6, 2, vec![2])
            .with_embedding_size(4)
            .with_num_filters(3);
        let mut vocab = OpenVocabulary::new();
        for word in ["goal", "match", "guitar", "song"] {
            vocab.id_or_insert(word);
        }
        let vocab = vocab.freeze();
        checkpoints.save_model_config(&config).unwrap();
        checkpoints.save_tables(&vocab, &labels()).unwrap();
        (checkpoints, config, vocab)
    }

    fn logits_of(
        checkpoints: &CheckpointManager,
        config: &TopicCnnConfig,
        vocab: &Vocabulary,
        kind: CheckpointKind,
        text: &str,
    ) -> Vec<f32> {
        let device = Default::default();
        let model = checkpoints
            .load_model(config.init::<TestBackend>(&device), kind, &device)
            .unwrap();
        let batcher = TopicBatcher::<TestBackend>::new(device, config.min_seq_length());
        let batch: TopicInferenceBatch<TestBackend> = batcher.batch(vec![vocab.encode(text)]);
        model
            .forward(batch.tokens, None)
            .into_data()
            .iter::<f32>()
            .collect()
    }

    #[test]
    fn infer_prefers_best_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (checkpoints, config, vocab) = saved_run(dir.path());
        let device = Default::default();
        checkpoints
            .save_model(&config.init::<TestBackend>(&device), CheckpointKind::Best)
            .unwrap();
        checkpoints
            .save_model(&config.init::<TestBackend>(&device), CheckpointKind::Final)
            .unwrap();
        let text = "goal match guitar";

        let predictions = infer::<TestBackend>(device, dir.path(), vec![text.to_string()]).unwrap();

        assert_eq!(
            preferred_checkpoint::<TestBackend>(&checkpoints),
            CheckpointKind::Best
        );
        let best = logits_of(&checkpoints, &config, &vocab, CheckpointKind::Best, text);
        let last = logits_of(&checkpoints, &config, &vocab, CheckpointKind::Final, text);
        assert_eq!(predictions[0].logits, best);
        assert_ne!(predictions[0].logits, last);
    }

    #[test]
    fn infer_falls_back_to_final_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (checkpoints, config, vocab) = saved_run(dir.path());
        let device = Default::default();
        checkpoints
            .save_model(&config.init::<TestBackend>(&device), CheckpointKind::Final)
            .unwrap();

        let predictions =
            infer::<TestBackend>(device, dir.path(), vec!["song".to_string(), String::new()])
                .unwrap();

        assert_eq!(
            preferred_checkpoint::<TestBackend>(&checkpoints),
            CheckpointKind::Final
        );
        let last = logits_of(&checkpoints, &config, &vocab, CheckpointKind::Final, "song");
        assert_eq!(predictions[0].logits, last);
        assert_eq!(predictions.len(), 2);
        assert!(predictions
            .iter()
            .all(|p| p.label == "sports" || p.label == "music"));
    }
}
