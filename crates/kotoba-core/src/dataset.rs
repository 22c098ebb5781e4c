//! Dataset loading for token-level sequence labeling.
//!
//! A split (train/dev/test) is a list of sentences, each an equal-length
//! pair of token and tag sequences. Two on-disk formats are supported:
//! a JSON document with parallel `seq_ins` / `seq_outs` arrays, and the
//! classic CoNLL layout of blank-line separated `word tag` pairs.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;

use crate::error::{KotobaError, Result};

/// A single sentence: parallel token and BIO tag sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub tokens: Vec<String>,
    pub tags: Vec<String>,
}

impl Example {
    /// Create an example, enforcing that tokens and tags line up.
    pub fn new(tokens: Vec<String>, tags: Vec<String>) -> Result<Self> {
        if tokens.len() != tags.len() {
            return Err(KotobaError::config(format!(
                "token/tag length mismatch: {} tokens vs {} tags",
                tokens.len(),
                tags.len()
            )));
        }
        Ok(Self { tokens, tags })
    }

    /// Number of tokens in the sentence.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// One dataset split (train, dev, or test).
#[derive(Debug, Clone, Default)]
pub struct Split {
    pub examples: Vec<Example>,
}

/// Wire shape of the JSON split document.
#[derive(Debug, Deserialize)]
struct RawSplit {
    seq_ins: Vec<Vec<String>>,
    seq_outs: Vec<Vec<String>>,
}

impl Split {
    /// Load a split from a JSON document with parallel `seq_ins` and
    /// `seq_outs` arrays.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| KotobaError::Dataset {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let raw: RawSplit =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| KotobaError::Dataset {
                path: path.to_path_buf(),
                reason: format!("invalid JSON split document: {e}"),
            })?;

        if raw.seq_ins.len() != raw.seq_outs.len() {
            return Err(KotobaError::Dataset {
                path: path.to_path_buf(),
                reason: format!(
                    "seq_ins has {} sentences but seq_outs has {}",
                    raw.seq_ins.len(),
                    raw.seq_outs.len()
                ),
            });
        }

        let examples = raw
            .seq_ins
            .into_iter()
            .zip(raw.seq_outs)
            .map(|(tokens, tags)| Example::new(tokens, tags))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { examples })
    }

    /// Load a split from a CoNLL-style file: one `word tag` pair per line,
    /// sentences separated by blank lines.
    pub fn from_conll_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| KotobaError::Dataset {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let reader = BufReader::new(file);

        let mut examples = Vec::new();
        let mut tokens = Vec::new();
        let mut tags = Vec::new();

        for line in reader.lines() {
            let line = line.map_err(|e| KotobaError::Dataset {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            let line = line.trim();

            if line.is_empty() {
                if !tokens.is_empty() {
                    examples.push(Example::new(
                        std::mem::take(&mut tokens),
                        std::mem::take(&mut tags),
                    )?);
                }
                continue;
            }

            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(word), Some(tag)) => {
                    tokens.push(word.to_string());
                    tags.push(tag.to_string());
                }
                _ => {
                    return Err(KotobaError::Dataset {
                        path: path.to_path_buf(),
                        reason: format!("expected `word tag` pair, got {line:?}"),
                    });
                }
            }
        }

        // Last sentence may not be followed by a blank line
        if !tokens.is_empty() {
            examples.push(Example::new(tokens, tags)?);
        }

        Ok(Self { examples })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn example_rejects_length_mismatch() {
        let result = Example::new(
            vec!["the".into(), "cat".into()],
            vec!["O".into()],
        );
        assert!(matches!(result, Err(KotobaError::Config { .. })));
    }

    #[test]
    fn load_json_split() {
        let dir = std::env::temp_dir().join("kotoba-dataset-json-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("train.json");
        let mut f = File::create(&path).unwrap();
        write!(
            f,
            r#"{{"seq_ins": [["the", "cat"], ["runs"]], "seq_outs": [["O", "B-NOUN"], ["B-VERB"]]}}"#
        )
        .unwrap();

        let split = Split::from_json_file(&path).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split.examples[0].tokens, vec!["the", "cat"]);
        assert_eq!(split.examples[1].tags, vec!["B-VERB"]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn load_json_split_mismatched_outer_lengths() {
        let dir = std::env::temp_dir().join("kotoba-dataset-json-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        let mut f = File::create(&path).unwrap();
        write!(f, r#"{{"seq_ins": [["a"]], "seq_outs": []}}"#).unwrap();

        let result = Split::from_json_file(&path);
        assert!(matches!(result, Err(KotobaError::Dataset { .. })));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn load_conll_split() {
        let dir = std::env::temp_dir().join("kotoba-dataset-conll-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("train.conll");
        let mut f = File::create(&path).unwrap();
        write!(f, "the O\ncat B-NOUN\n\nruns B-VERB\n").unwrap();

        let split = Split::from_conll_file(&path).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split.examples[0].tokens, vec!["the", "cat"]);
        assert_eq!(split.examples[1].tokens, vec!["runs"]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = Split::from_json_file("/nonexistent/split.json").unwrap_err();
        assert!(err.to_string().contains("split.json"));
    }
}
