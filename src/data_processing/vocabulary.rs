// This module defines the Tokenizer trait, the common interface used by the
// batcher and the inference path, together with the two-phase vocabulary:
// an `OpenVocabulary` that allocates ids while the training split is read, and
// a frozen `Vocabulary` that resolves unseen words to the unknown id. Topic
// labels go through the same two phases with `LabelSetBuilder` / `LabelSet`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";
pub const PAD_ID: usize = 0;
pub const UNK_ID: usize = 1;

pub trait Tokenizer: Send + Sync {
    /// Converts a text string into a sequence of token ids.
    fn encode(&self, value: &str) -> Vec<usize>;

    /// Converts a sequence of token ids back into a text string.
    fn decode(&self, tokens: &[usize]) -> String;

    /// Number of distinct ids, reserved ones included.
    fn vocab_size(&self) -> usize;

    /// Id used to pad sequences to the same length.
    fn pad_token(&self) -> usize;

    /// String form of the padding token.
    /// The default implementation decodes the padding id.
    fn pad_token_value(&self) -> String {
        self.decode(&[self.pad_token()])
    }
}

/// Dense string <-> id table in first-seen order.
#[derive(Debug, Clone, Default)]
struct Lexicon {
    entries: Vec<String>,
    index: HashMap<String, usize>,
}

impl Lexicon {
    fn from_entries(entries: Vec<String>) -> Self {
        let mut lexicon = Self::default();
        for entry in entries {
            lexicon.intern(&entry);
        }
        lexicon
    }

    fn intern(&mut self, key: &str) -> usize {
        if let Some(&id) = self.index.get(key) {
            return id;
        }
        let id = self.entries.len();
        self.entries.push(key.to_string());
        self.index.insert(key.to_string(), id);
        id
    }

    fn get(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    fn name(&self, id: usize) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Vocabulary that still grows: every unseen word gets the next id.
#[derive(Debug, Clone)]
pub struct OpenVocabulary {
    lexicon: Lexicon,
}

impl Default for OpenVocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenVocabulary {
    pub fn new() -> Self {
        let mut lexicon = Lexicon::default();
        lexicon.intern(PAD_TOKEN);
        lexicon.intern(UNK_TOKEN);
        Self { lexicon }
    }

    pub fn id_or_insert(&mut self, word: &str) -> usize {
        self.lexicon.intern(word)
    }

    pub fn len(&self) -> usize {
        self.lexicon.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lexicon.len() == 0
    }

    /// Stops id allocation. Lookups on the result never change it.
    pub fn freeze(self) -> Vocabulary {
        Vocabulary {
            lexicon: self.lexicon,
        }
    }
}

/// Frozen vocabulary. Unknown words resolve to [`UNK_ID`].
#[derive(Debug, Clone)]
pub struct Vocabulary {
    lexicon: Lexicon,
}

impl Vocabulary {
    pub fn id(&self, word: &str) -> usize {
        self.lexicon.get(word).unwrap_or(UNK_ID)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.lexicon.get(word).is_some()
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.lexicon.name(id)
    }

    /// Tokens in id order, reserved tokens first.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.lexicon.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lexicon.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lexicon.len() == 0
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_entries(path.as_ref(), &self.lexicon.entries)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let entries = load_entries(path.as_ref())?;
        Ok(Self {
            lexicon: Lexicon::from_entries(entries),
        })
    }
}

impl Tokenizer for Vocabulary {
    // Lowercases and splits on whitespace, like the dataset reader.
    fn encode(&self, value: &str) -> Vec<usize> {
        value
            .to_lowercase()
            .split_whitespace()
            .map(|word| self.id(word))
            .collect()
    }

    fn decode(&self, tokens: &[usize]) -> String {
        tokens
            .iter()
            .map(|&id| self.token(id).unwrap_or(UNK_TOKEN))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn vocab_size(&self) -> usize {
        self.len()
    }

    fn pad_token(&self) -> usize {
        PAD_ID
    }
}

/// Topic labels seen so far in the training split.
#[derive(Debug, Clone, Default)]
pub struct LabelSetBuilder {
    lexicon: Lexicon,
}

impl LabelSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_or_insert(&mut self, label: &str) -> usize {
        self.lexicon.intern(label)
    }

    pub fn freeze(self) -> LabelSet {
        LabelSet {
            lexicon: self.lexicon,
        }
    }
}

/// Frozen label table; its length is the classifier's output size.
#[derive(Debug, Clone)]
pub struct LabelSet {
    lexicon: Lexicon,
}

impl LabelSet {
    pub fn id(&self, label: &str) -> Option<usize> {
        self.lexicon.get(label)
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.lexicon.name(id)
    }

    pub fn len(&self) -> usize {
        self.lexicon.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lexicon.len() == 0
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_entries(path.as_ref(), &self.lexicon.entries)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let entries = load_entries(path.as_ref())?;
        Ok(Self {
            lexicon: Lexicon::from_entries(entries),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct EntriesFile {
    entries: Vec<String>,
}

fn save_entries(path: &Path, entries: &[String]) -> Result<()> {
    let file = EntriesFile {
        entries: entries.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(Error::io(path))
}

fn load_entries(path: &Path) -> Result<Vec<String>> {
    let json = fs::read_to_string(path).map_err(Error::io(path))?;
    let file: EntriesFile = serde_json::from_str(&json).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_pad_and_unknown_ids() {
        let vocab = OpenVocabulary::new().freeze();
        assert_eq!(vocab.id(PAD_TOKEN), PAD_ID);
        assert_eq!(vocab.id(UNK_TOKEN), UNK_ID);
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn assigns_ids_in_first_seen_order_without_reassigning() {
        let mut open = OpenVocabulary::new();
        assert_eq!(open.id_or_insert("x"), 2);
        assert_eq!(open.id_or_insert("y"), 3);
        assert_eq!(open.id_or_insert("x"), 2);
        assert_eq!(open.id_or_insert("z"), 4);
        assert_eq!(open.len(), 5);
    }

    #[test]
    fn frozen_vocabulary_falls_back_to_unknown() {
        let mut open = OpenVocabulary::new();
        open.id_or_insert("known");
        let vocab = open.freeze();

        assert_eq!(vocab.id("known"), 2);
        assert_eq!(vocab.id("never-seen"), UNK_ID);
        assert_eq!(vocab.len(), 3);
        assert!(!vocab.contains("never-seen"));
    }

    #[test]
    fn tokenizer_lowercases_and_splits() {
        let mut open = OpenVocabulary::new();
        open.id_or_insert("hello");
        open.id_or_insert("world");
        let vocab = open.freeze();

        assert_eq!(vocab.encode("Hello  WORLD again"), vec![2, 3, UNK_ID]);
        assert_eq!(vocab.decode(&[2, 3, 1]), "hello world <unk>");
        assert_eq!(vocab.pad_token_value(), PAD_TOKEN);
    }

    #[test]
    fn labels_are_numbered_independently() {
        let mut labels = LabelSetBuilder::new();
        assert_eq!(labels.id_or_insert("sports"), 0);
        assert_eq!(labels.id_or_insert("music"), 1);
        assert_eq!(labels.id_or_insert("sports"), 0);
        let labels = labels.freeze();

        assert_eq!(labels.len(), 2);
        assert_eq!(labels.name(1), Some("music"));
        assert_eq!(labels.id("film"), None);
    }

    #[test]
    fn tables_survive_a_save_load_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut open = OpenVocabulary::new();
        open.id_or_insert("alpha");
        open.id_or_insert("beta");
        let vocab = open.freeze();
        let path = dir.path().join("vocab.json");

        vocab.save(&path).unwrap();
        let loaded = Vocabulary::load(&path).unwrap();

        assert_eq!(loaded.len(), vocab.len());
        assert_eq!(loaded.id("beta"), 3);
        assert_eq!(loaded.id("gamma"), UNK_ID);
    }
}
