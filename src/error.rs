// Errors raised while reading corpora and embedding tables, building the model
// and persisting training artifacts.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error on `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A dataset line without the ` ||| ` separator between label and words.
    #[error("{path}:{line}: expected `<label> ||| <words>`, got {content:?}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("{path}:{line}: label {label:?} does not occur in the training split")]
    UnknownLabel {
        path: PathBuf,
        line: usize,
        label: String,
    },

    #[error("malformed embedding table `{path}`: {reason}")]
    Embeddings { path: PathBuf, reason: String },

    #[error("embedding dimension mismatch: table has {found}, model expects {expected}")]
    EmbeddingDimension { expected: usize, found: usize },

    #[error("dataset `{0}` contains no examples")]
    EmptyDataset(PathBuf),

    #[error("checkpoint `{path}`: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    #[error("configuration `{path}`: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("json encoding of `{path}` failed")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::Io { path, source }
    }
}
