// Artifacts of a training run, all stored in one directory:
//
//   config.json    training hyperparameters
//   model.json     architecture needed to rebuild the network
//   vocab.json     frozen vocabulary, in id order
//   labels.json    frozen label table, in id order
//   best.mpk       weights at the best validation accuracy
//   model.mpk      weights after the last epoch
//   metrics.csv    one row per epoch
//   op.txt         predicted label of every test example

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    record::{CompactRecorder, FileRecorder},
    tensor::backend::Backend,
};

use crate::data_processing::{LabelSet, Vocabulary};
use crate::error::{Error, Result};
use crate::model::{TopicCnn, TopicCnnConfig};
use crate::training::TrainingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Highest validation accuracy so far.
    Best,
    /// State after the last epoch.
    Final,
}

impl CheckpointKind {
    fn stem(self) -> &'static str {
        match self {
            CheckpointKind::Best => "best",
            CheckpointKind::Final => "model",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(Error::io(&dir))?;
        Ok(Self { dir })
    }

    /// Opens an existing run directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::Checkpoint {
                path: dir,
                reason: "not a directory".to_string(),
            });
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.dir.join("op.txt")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join("metrics.csv")
    }

    /// Path of a weights file without extension; the recorder appends its own.
    pub fn model_path(&self, kind: CheckpointKind) -> PathBuf {
        self.dir.join(kind.stem())
    }

    /// Path of the weights file as the recorder writes it.
    pub fn model_file<B: Backend>(&self, kind: CheckpointKind) -> PathBuf {
        self.model_path(kind)
            .with_extension(<CompactRecorder as FileRecorder<B>>::file_extension())
    }

    pub fn has_model<B: Backend>(&self, kind: CheckpointKind) -> bool {
        self.model_file::<B>(kind).is_file()
    }

    pub fn save_model<B: Backend>(&self, model: &TopicCnn<B>, kind: CheckpointKind) -> Result<()> {
        let path = self.model_path(kind);
        model
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .map_err(|e| Error::Checkpoint {
                path: path.clone(),
                reason: format!("{e:?}"),
            })?;
        tracing::debug!("Saved {:?} checkpoint to {}", kind, path.display());
        Ok(())
    }

    /// Loads weights into `model`, which must have the saved architecture.
    pub fn load_model<B: Backend>(
        &self,
        model: TopicCnn<B>,
        kind: CheckpointKind,
        device: &B::Device,
    ) -> Result<TopicCnn<B>> {
        let path = self.model_path(kind);
        model
            .load_file(path.clone(), &CompactRecorder::new(), device)
            .map_err(|e| Error::Checkpoint {
                path,
                reason: format!("{e:?}"),
            })
    }

    pub fn save_config(&self, config: &TrainingConfig) -> Result<()> {
        let path = self.dir.join("config.json");
        config.save(&path).map_err(Error::io(&path))
    }

    pub fn load_config(&self) -> Result<TrainingConfig> {
        load_config(self.dir.join("config.json"))
    }

    pub fn save_model_config(&self, config: &TopicCnnConfig) -> Result<()> {
        let path = self.dir.join("model.json");
        config.save(&path).map_err(Error::io(&path))
    }

    pub fn load_model_config(&self) -> Result<TopicCnnConfig> {
        load_config(self.dir.join("model.json"))
    }

    pub fn save_tables(&self, vocab: &Vocabulary, labels: &LabelSet) -> Result<()> {
        vocab.save(self.dir.join("vocab.json"))?;
        labels.save(self.dir.join("labels.json"))
    }

    pub fn load_tables(&self) -> Result<(Vocabulary, LabelSet)> {
        let vocab = Vocabulary::load(self.dir.join("vocab.json"))?;
        let labels = LabelSet::load(self.dir.join("labels.json"))?;
        Ok((vocab, labels))
    }
}

/// Reads any burn config from a JSON file.
pub fn load_config<C: Config>(path: impl AsRef<Path>) -> Result<C> {
    let path = path.as_ref();
    C::load(path).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        reason: format!("{e:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_processing::{LabelSetBuilder, OpenVocabulary};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn model_config() -> TopicCnnConfig {
        TopicCnnConfig::new(6, 2, vec![2]).with_embedding_size(3).with_num_filters(2)
    }

    #[test]
    fn saves_and_reloads_weights() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path().join("run")).unwrap();
        let device = Default::default();
        let model = model_config().init::<TestBackend>(&device);

        assert!(!checkpoints.has_model::<TestBackend>(CheckpointKind::Best));
        checkpoints.save_model(&model, CheckpointKind::Best).unwrap();
        assert!(checkpoints.has_model::<TestBackend>(CheckpointKind::Best));
        assert!(!checkpoints.has_model::<TestBackend>(CheckpointKind::Final));

        let fresh = model_config().init::<TestBackend>(&device);
        let loaded = checkpoints
            .load_model(fresh, CheckpointKind::Best, &device)
            .unwrap();
        assert_eq!(loaded.num_params(), model.num_params());
    }

    #[test]
    fn detects_the_file_the_recorder_writes() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();
        let model = model_config().init::<TestBackend>(&device);

        checkpoints.save_model(&model, CheckpointKind::Final).unwrap();

        let written: Vec<PathBuf> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(
            written,
            vec![checkpoints.model_file::<TestBackend>(CheckpointKind::Final)]
        );
        assert!(checkpoints.has_model::<TestBackend>(CheckpointKind::Final));
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();
        let model = model_config().init::<TestBackend>(&device);

        let err = checkpoints
            .load_model(model, CheckpointKind::Final, &device)
            .unwrap_err();

        assert!(matches!(err, Error::Checkpoint { .. }));
    }

    #[test]
    fn stores_configs_and_tables() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path()).unwrap();
        let mut vocab = OpenVocabulary::new();
        vocab.id_or_insert("goal");
        let mut labels = LabelSetBuilder::new();
        labels.id_or_insert("sports");

        checkpoints.save_model_config(&model_config()).unwrap();
        checkpoints
            .save_tables(&vocab.freeze(), &labels.freeze())
            .unwrap();

        let config = checkpoints.load_model_config().unwrap();
        assert_eq!(config.kernel_sizes, vec![2]);
        assert_eq!(config.embedding_size, 3);
        let (vocab, labels) = checkpoints.load_tables().unwrap();
        assert_eq!(vocab.id("goal"), 2);
        assert_eq!(labels.name(0), Some("sports"));
    }

    #[test]
    fn open_requires_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CheckpointManager::open(dir.path().join("absent")).is_err());
        assert!(CheckpointManager::open(dir.path()).is_ok());
    }
}
