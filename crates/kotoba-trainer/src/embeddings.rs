//! Pretrained word vectors for the embedding layer.
//!
//! Vectors are read from a GloVe-format text file (`word v1 .. vd` per
//! line). When only a cache directory is configured, the file is
//! downloaded from the remote provider into the cache on first use and
//! read from there on every later run.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use oorandom::Rand32;
use tracing::{info, warn};

use kotoba_core::error::{KotobaError, Result};
use kotoba_core::vocab::WordVocab;

/// Default remote provider for pretrained vectors.
const DEFAULT_VECTORS_URL: &str =
    "https://huggingface.co/stanfordnlp/glove/resolve/main/glove.6B.300d.txt";

/// File name used inside the embedding cache directory.
const CACHE_FILE_NAME: &str = "glove.6B.300d.txt";

/// Pretrained vectors restricted to the words of one vocabulary.
#[derive(Debug, Clone)]
pub struct PretrainedVectors {
    dim: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl PretrainedVectors {
    /// Read a GloVe-format file, keeping only rows for words in `vocab`.
    /// Rows whose dimensionality does not match `dim` are skipped.
    pub fn load_for_vocab<P: AsRef<Path>>(path: P, dim: usize, vocab: &WordVocab) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| KotobaError::Embedding {
            reason: format!("cannot open vector file {path:?}: {e}"),
        })?;

        let mut vectors = HashMap::new();
        let mut skipped = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| KotobaError::Embedding {
                reason: format!("read error in {path:?}: {e}"),
            })?;
            let mut parts = line.split_whitespace();
            let Some(word) = parts.next() else { continue };
            if !vocab.contains(word) {
                continue;
            }
            let values: Vec<f32> = parts.filter_map(|v| v.parse().ok()).collect();
            if values.len() == dim {
                vectors.insert(word.to_string(), values);
            } else {
                skipped += 1;
            }
        }
        if skipped > 0 {
            warn!(skipped, "vector rows with wrong dimensionality ignored");
        }
        info!(
            covered = vectors.len(),
            vocab = vocab.len(),
            "loaded pretrained vectors"
        );

        Ok(Self { dim, vectors })
    }

    pub fn get(&self, word: &str) -> Option<&[f32]> {
        self.vectors.get(word).map(Vec::as_slice)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of vocabulary words with a pretrained vector.
    pub fn coverage(&self) -> usize {
        self.vectors.len()
    }
}

/// Resolve where pretrained vectors should come from.
///
/// An explicit file wins; otherwise the cache directory is consulted and
/// populated from the remote provider on a miss. Returns `None` when the
/// run is configured without pretrained vectors at all.
pub fn locate_vectors(
    word_embedding: Option<&Path>,
    embedding_cache: Option<&Path>,
) -> Result<Option<PathBuf>> {
    if let Some(path) = word_embedding {
        if !path.exists() {
            return Err(KotobaError::Embedding {
                reason: format!("vector file {path:?} does not exist"),
            });
        }
        return Ok(Some(path.to_path_buf()));
    }

    let Some(cache_dir) = embedding_cache else {
        return Ok(None);
    };

    let cached = cache_dir.join(CACHE_FILE_NAME);
    if cached.exists() {
        info!(path = ?cached, "using cached pretrained vectors");
        return Ok(Some(cached));
    }

    std::fs::create_dir_all(cache_dir).map_err(|e| KotobaError::Resource {
        path: cache_dir.to_path_buf(),
        source: e,
    })?;
    info!(url = DEFAULT_VECTORS_URL, "downloading pretrained vectors");
    let mut response = reqwest::blocking::get(DEFAULT_VECTORS_URL)
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|e| KotobaError::Embedding {
            reason: format!("download from {DEFAULT_VECTORS_URL} failed: {e}"),
        })?;
    let mut file = File::create(&cached).map_err(|e| KotobaError::Resource {
        path: cached.clone(),
        source: e,
    })?;
    response
        .copy_to(&mut file)
        .map_err(|e| KotobaError::Embedding {
            reason: format!("download from {DEFAULT_VECTORS_URL} failed: {e}"),
        })?;

    Ok(Some(cached))
}

/// Build the row-major `(vocab, dim)` embedding matrix.
///
/// Every row starts uniform in [-0.25, 0.25] from the seeded RNG, rows of
/// covered words are overwritten with their pretrained vector, and the
/// pad row is zeroed so padded positions contribute nothing.
pub fn build_embedding_matrix(
    vocab: &WordVocab,
    dim: usize,
    pretrained: Option<&PretrainedVectors>,
    rng: &mut Rand32,
) -> Vec<f32> {
    let mut matrix = Vec::with_capacity(vocab.len() * dim);
    for _ in 0..vocab.len() * dim {
        matrix.push(rng.rand_float() * 0.5 - 0.25);
    }

    let pad_row = vocab.pad_id() as usize * dim;
    matrix[pad_row..pad_row + dim].fill(0.0);

    if let Some(pretrained) = pretrained {
        for (word, id) in vocab.iter() {
            if let Some(vector) = pretrained.get(word) {
                let row = id as usize * dim;
                matrix[row..row + dim].copy_from_slice(vector);
            }
        }
    }

    matrix
}
