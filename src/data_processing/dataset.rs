// Topic classification corpora are plain text files with one example per line:
//
//     <label> ||| <space separated words>
//
// The reader lowercases and trims every line before splitting it. A line must
// hold exactly one separator; blank lines are malformed too, so every input
// line yields exactly one example. The training
// split is read first and is the only one allowed to grow the vocabulary and
// the label set; validation and test splits are read against the frozen
// tables. `TopicDataset` wraps the resulting examples for burn's data loader.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::iter::Enumerate;
use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use derive_new::new;

use super::vocabulary::{LabelSet, LabelSetBuilder, OpenVocabulary, Vocabulary};
use crate::error::{Error, Result};

pub const FIELD_SEPARATOR: &str = " ||| ";

/// An encoded example: token ids and the label id.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct TopicItem {
    pub tokens: Vec<usize>, // Token ids, unpadded
    pub label: usize,       // Label id
}

/// One parsed line before any id lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawExample {
    pub line: usize, // 1-based line number in the source file
    pub label: String,
    pub words: Vec<String>,
}

/// Splits a line into its lowercased label and words.
///
/// Returns `None` unless the line has exactly two fields.
pub fn parse_line(line: &str) -> Option<(String, Vec<String>)> {
    let line = line.to_lowercase();
    let mut fields = line.trim().split(FIELD_SEPARATOR);
    let (label, words) = match (fields.next(), fields.next(), fields.next()) {
        (Some(label), Some(words), None) => (label, words),
        _ => return None,
    };
    let words = words.split_whitespace().map(str::to_string).collect();
    Some((label.to_string(), words))
}

/// Lazy line-by-line reader over a corpus file, one example per line.
pub struct RawExamples {
    path: PathBuf,
    lines: Enumerate<Lines<BufReader<File>>>,
}

impl RawExamples {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(Error::io(&path))?;
        Ok(Self {
            lines: BufReader::new(file).lines().enumerate(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for RawExamples {
    type Item = Result<RawExample>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, line) = self.lines.next()?;
        let line = match line {
            Ok(line) => line,
            Err(source) => {
                return Some(Err(Error::Io {
                    path: self.path.clone(),
                    source,
                }))
            }
        };

        Some(match parse_line(&line) {
            Some((label, words)) => Ok(RawExample {
                line: index + 1,
                label,
                words,
            }),
            None => Err(Error::MalformedLine {
                path: self.path.clone(),
                line: index + 1,
                content: line,
            }),
        })
    }
}

/// Reads the training split, growing both tables.
pub fn read_training(
    path: impl AsRef<Path>,
    vocab: &mut OpenVocabulary,
    labels: &mut LabelSetBuilder,
) -> Result<Vec<TopicItem>> {
    RawExamples::open(path)?
        .map(|example| {
            let example = example?;
            let tokens = example
                .words
                .iter()
                .map(|word| vocab.id_or_insert(word))
                .collect();
            Ok(TopicItem::new(tokens, labels.id_or_insert(&example.label)))
        })
        .collect()
}

/// Reads a labeled split against frozen tables.
pub fn read_labeled(
    path: impl AsRef<Path>,
    vocab: &Vocabulary,
    labels: &LabelSet,
) -> Result<Vec<TopicItem>> {
    let examples = RawExamples::open(path)?;
    let path = examples.path().to_path_buf();

    examples
        .map(|example| {
            let example = example?;
            let label = labels.id(&example.label).ok_or_else(|| Error::UnknownLabel {
                path: path.clone(),
                line: example.line,
                label: example.label.clone(),
            })?;
            let tokens = example.words.iter().map(|word| vocab.id(word)).collect();
            Ok(TopicItem::new(tokens, label))
        })
        .collect()
}

/// Reads the test split. The label field must be present but is ignored.
pub fn read_unlabeled(path: impl AsRef<Path>, vocab: &Vocabulary) -> Result<Vec<Vec<usize>>> {
    RawExamples::open(path)?
        .map(|example| {
            let example = example?;
            Ok(example.words.iter().map(|word| vocab.id(word)).collect())
        })
        .collect()
}

/// Locations of the three corpus splits.
#[derive(new, Clone, Debug)]
pub struct CorpusPaths {
    pub train: PathBuf,
    pub valid: PathBuf,
    pub test: PathBuf,
}

/// All three splits encoded with tables built from the training split.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub vocab: Vocabulary,
    pub labels: LabelSet,
    pub train: Vec<TopicItem>,
    pub valid: Vec<TopicItem>,
    pub test: Vec<Vec<usize>>,
}

impl Corpus {
    pub fn load(paths: &CorpusPaths) -> Result<Self> {
        let mut vocab = OpenVocabulary::new();
        let mut labels = LabelSetBuilder::new();
        let train = read_training(&paths.train, &mut vocab, &mut labels)?;
        if train.is_empty() {
            return Err(Error::EmptyDataset(paths.train.clone()));
        }

        let vocab = vocab.freeze();
        let labels = labels.freeze();
        tracing::info!(
            "Training split: {} examples, {} words, {} labels",
            train.len(),
            vocab.len(),
            labels.len()
        );

        let valid = read_labeled(&paths.valid, &vocab, &labels)?;
        if valid.is_empty() {
            return Err(Error::EmptyDataset(paths.valid.clone()));
        }
        let test = read_unlabeled(&paths.test, &vocab)?;
        tracing::info!(
            "Validation split: {} examples, test split: {} examples",
            valid.len(),
            test.len()
        );

        Ok(Self {
            vocab,
            labels,
            train,
            valid,
            test,
        })
    }
}

/// In-memory dataset of encoded examples.
#[derive(new, Debug, Clone)]
pub struct TopicDataset {
    items: Vec<TopicItem>,
}

impl Dataset<TopicItem> for TopicDataset {
    fn get(&self, index: usize) -> Option<TopicItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
