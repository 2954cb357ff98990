// Pretrained word vectors in the word2vec formats and the embedding matrix
// used to initialize the classifier.
//
// Binary layout: an ASCII header `<count> <dim>\n`, then for each entry the
// word bytes terminated by a space and `dim` little-endian f32 values, usually
// followed by a newline. The text layout has the same header followed by one
// `word v1 .. vdim` line per entry.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use rand::Rng;

use super::vocabulary::Vocabulary;
use crate::error::{Error, Result};

/// Widest vector a table header may declare.
pub const MAX_DIMENSION: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingFormat {
    #[default]
    Binary,
    Text,
}

/// Controls how much of a (possibly huge) table is kept in memory.
#[derive(Default)]
pub struct LoadOptions<'a> {
    /// Stop after this many entries.
    pub limit: Option<usize>,
    /// Keep only the words accepted by this filter.
    pub keep: Option<&'a dyn Fn(&str) -> bool>,
}

impl<'a> LoadOptions<'a> {
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Keeps only the words of a frozen vocabulary.
    pub fn restricted_to(mut self, keep: &'a dyn Fn(&str) -> bool) -> Self {
        self.keep = Some(keep);
        self
    }
}

/// Word -> vector lookup.
#[derive(Debug, Clone)]
pub struct WordVectors {
    dim: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl WordVectors {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: HashMap::new(),
        }
    }

    /// Adds a vector unless the word is already present.
    pub fn insert(&mut self, word: impl Into<String>, vector: Vec<f32>) {
        debug_assert_eq!(vector.len(), self.dim);
        self.vectors.entry(word.into()).or_insert(vector);
    }

    pub fn get(&self, word: &str) -> Option<&[f32]> {
        self.vectors.get(word).map(Vec::as_slice)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn load(
        path: impl AsRef<Path>,
        format: EmbeddingFormat,
        options: &LoadOptions<'_>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(Error::io(path))?;
        let mut reader = TableReader {
            path: path.to_path_buf(),
            inner: BufReader::new(file),
        };

        let (count, dim) = reader.header()?;
        let count = options.limit.map_or(count, |limit| limit.min(count));
        tracing::info!("Loading {count} word vectors of dimension {dim} from {}", path.display());

        let mut table = Self::new(dim);
        for _ in 0..count {
            let (word, vector) = match format {
                EmbeddingFormat::Binary => reader.binary_entry(dim)?,
                EmbeddingFormat::Text => reader.text_entry(dim)?,
            };
            if options.keep.map_or(true, |keep| keep(&word)) {
                table.insert(word, vector);
            }
        }

        tracing::info!("Kept {} word vectors", table.len());
        Ok(table)
    }
}

struct TableReader {
    path: PathBuf,
    inner: BufReader<File>,
}

impl TableReader {
    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::Embeddings {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn io(&self, source: std::io::Error) -> Error {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            return self.malformed("unexpected end of file");
        }
        Error::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn header(&mut self) -> Result<(usize, usize)> {
        let mut line = String::new();
        self.inner.read_line(&mut line).map_err(|e| self.io(e))?;

        let mut fields = line.split_whitespace().map(str::parse::<usize>);
        match (fields.next(), fields.next(), fields.next()) {
            (Some(Ok(count)), Some(Ok(dim)), None) if (1..=MAX_DIMENSION).contains(&dim) => {
                Ok((count, dim))
            }
            _ => Err(self.malformed(format!("bad header {:?}", line.trim_end()))),
        }
    }

    fn binary_entry(&mut self, dim: usize) -> Result<(String, Vec<f32>)> {
        let mut word = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            self.inner.read_exact(&mut byte).map_err(|e| self.io(e))?;
            match byte[0] {
                b' ' => break,
                // separator left over from the previous entry
                b'\n' if word.is_empty() => continue,
                b => word.push(b),
            }
        }
        let word = String::from_utf8(word).map_err(|_| self.malformed("word is not valid utf-8"))?;

        let width = dim
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or_else(|| self.malformed(format!("dimension {dim} is too large")))?;
        let mut bytes = vec![0u8; width];
        self.inner.read_exact(&mut bytes).map_err(|e| self.io(e))?;
        let vector = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok((word, vector))
    }

    fn text_entry(&mut self, dim: usize) -> Result<(String, Vec<f32>)> {
        let mut line = String::new();
        let read = self.inner.read_line(&mut line).map_err(|e| self.io(e))?;
        if read == 0 {
            return Err(self.malformed("unexpected end of file"));
        }

        let mut fields = line.split_whitespace();
        let word = fields
            .next()
            .ok_or_else(|| self.malformed("empty entry"))?
            .to_string();
        let vector = fields
            .map(str::parse::<f32>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| self.malformed(format!("entry {word:?}: {e}")))?;
        if vector.len() != dim {
            return Err(self.malformed(format!(
                "entry {word:?} has {} values, expected {dim}",
                vector.len()
            )));
        }

        Ok((word, vector))
    }
}

/// Dense `[vocab_size, dim]` matrix in row-major order.
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    pub rows: usize,
    pub dim: usize,
    pub values: Vec<f32>,
    pub pretrained_rows: usize, // Rows copied from the pretrained table
}

impl EmbeddingMatrix {
    /// One row per vocabulary id. Words missing from `vectors` get values drawn
    /// uniformly from `[-scale, scale]`.
    pub fn build<R: Rng>(
        vocab: &Vocabulary,
        vectors: &WordVectors,
        dim: usize,
        scale: f32,
        rng: &mut R,
    ) -> Result<Self> {
        if vectors.dim() != dim {
            return Err(Error::EmbeddingDimension {
                expected: dim,
                found: vectors.dim(),
            });
        }

        let mut values = Vec::with_capacity(vocab.len() * dim);
        let mut pretrained_rows = 0;
        for token in vocab.tokens() {
            match vectors.get(token) {
                Some(vector) => {
                    values.extend_from_slice(vector);
                    pretrained_rows += 1;
                }
                None => values.extend((0..dim).map(|_| rng.gen_range(-scale..=scale))),
            }
        }

        let matrix = Self {
            rows: vocab.len(),
            dim,
            values,
            pretrained_rows,
        };
        tracing::info!(
            "Embedding matrix: {}/{} rows pretrained ({:.1}%)",
            matrix.pretrained_rows,
            matrix.rows,
            matrix.coverage() * 100.0
        );
        if matrix.pretrained_rows == 0 {
            tracing::warn!("No vocabulary word was found in the pretrained table");
        }
        Ok(matrix)
    }

    pub fn row(&self, id: usize) -> &[f32] {
        &self.values[id * self.dim..(id + 1) * self.dim]
    }

    pub fn coverage(&self) -> f64 {
        if self.rows == 0 {
            return 0.0;
        }
        self.pretrained_rows as f64 / self.rows as f64
    }
}
