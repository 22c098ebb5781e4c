//! # Word and label vocabularies
//!
//! Deterministic string-to-id mappings for tokens and BIO tags. Ids are a
//! pure function of the (sorted) input sets, so repeated builds over the
//! same corpus produce byte-identical artifacts.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::Path;

use crate::dataset::{Example, Split};
use crate::error::{KotobaError, Result};

/// Reserved token mapped to by every word unseen during training.
pub const OOV_TOKEN: &str = "<oov>";
/// Reserved token filling positions past a sentence's true length.
pub const PAD_TOKEN: &str = "<pad>";
/// Reserved label filling padded positions in the tag tensor.
pub const PAD_LABEL: &str = "<pad>";
/// The outside tag of the BIO scheme.
pub const OUTSIDE_LABEL: &str = "O";

/// Word vocabulary built from the training corpus only.
///
/// Layout: `<oov>` = 0, `<pad>` = 1, then every distinct training token in
/// sorted order. Dev/test tokens absent from the map fall back to the OOV
/// id at batch time and are never added.
#[derive(Debug, Clone)]
pub struct WordVocab {
    word2id: BTreeMap<String, u32>,
}

impl WordVocab {
    /// Build the vocabulary from the training examples.
    pub fn build(examples: &[Example]) -> Self {
        // BTreeSet-like dedup + sort comes free from the map
        let mut word2id = BTreeMap::new();
        word2id.insert(OOV_TOKEN.to_string(), 0);
        word2id.insert(PAD_TOKEN.to_string(), 1);

        let mut words: Vec<&str> = examples
            .iter()
            .flat_map(|ex| ex.tokens.iter().map(String::as_str))
            .collect();
        words.sort_unstable();
        words.dedup();

        let mut next_id = 2u32;
        for word in words {
            // Reserved names colliding with corpus tokens keep their reserved ids
            if !word2id.contains_key(word) {
                word2id.insert(word.to_string(), next_id);
                next_id += 1;
            }
        }

        Self { word2id }
    }

    /// Look up a word, falling back to the OOV id for unseen words.
    pub fn lookup(&self, word: &str) -> u32 {
        self.word2id.get(word).copied().unwrap_or(self.oov_id())
    }

    /// Whether the word was observed during training (or is reserved).
    pub fn contains(&self, word: &str) -> bool {
        self.word2id.contains_key(word)
    }

    pub fn oov_id(&self) -> u32 {
        0
    }

    pub fn pad_id(&self) -> u32 {
        1
    }

    /// Number of entries, reserved tokens included.
    pub fn len(&self) -> usize {
        self.word2id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word2id.is_empty()
    }

    /// Iterate over `(word, id)` pairs in sorted word order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.word2id.iter().map(|(w, &id)| (w.as_str(), id))
    }

    /// Persist as a JSON object mapping word to id. Keys are sorted, so the
    /// bytes are identical across runs over the same corpus.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| KotobaError::Resource {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::to_writer(BufWriter::new(file), &self.word2id)?;
        Ok(())
    }
}

/// BIO tag taxonomy with a fixed structural layout.
///
/// `<pad>` = 0, `O` = 1, then for each sorted base label X the pair `B-X`,
/// `I-X` adjacently. Size is always `2 + 2 * |base labels|`.
#[derive(Debug, Clone)]
pub struct LabelVocab {
    tag2id: BTreeMap<String, u32>,
    id2tag: Vec<String>,
}

impl LabelVocab {
    /// Build from a set of base labels (no BIO prefixes).
    pub fn from_base_labels<S: AsRef<str>>(base_labels: &[S]) -> Result<Self> {
        let mut bases: Vec<&str> = base_labels
            .iter()
            .map(AsRef::as_ref)
            .filter(|l| *l != OUTSIDE_LABEL && *l != PAD_LABEL)
            .collect();
        bases.sort_unstable();
        bases.dedup();

        if bases.is_empty() {
            return Err(KotobaError::config("label set is empty"));
        }

        let mut id2tag = Vec::with_capacity(2 + 2 * bases.len());
        id2tag.push(PAD_LABEL.to_string());
        id2tag.push(OUTSIDE_LABEL.to_string());
        for base in bases {
            id2tag.push(format!("B-{base}"));
            id2tag.push(format!("I-{base}"));
        }

        let tag2id = id2tag
            .iter()
            .enumerate()
            .map(|(id, tag)| (tag.clone(), id as u32))
            .collect();

        Ok(Self { tag2id, id2tag })
    }

    /// Build from a label-list file: one base label per line.
    pub fn from_label_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut contents = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut contents))
            .map_err(|e| KotobaError::config(format!("label list {path:?} unreadable: {e}")))?;

        let labels: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if labels.is_empty() {
            return Err(KotobaError::config(format!("label list {path:?} is empty")));
        }
        Self::from_base_labels(&labels)
    }

    /// Derive the base label set from the union of the given splits'
    /// tag sequences, stripping `B-`/`I-` prefixes.
    pub fn from_splits(splits: &[&Split]) -> Result<Self> {
        let bases: Vec<String> = splits
            .iter()
            .flat_map(|s| s.examples.iter())
            .flat_map(|ex| ex.tags.iter())
            .map(|tag| {
                tag.strip_prefix("B-")
                    .or_else(|| tag.strip_prefix("I-"))
                    .unwrap_or(tag)
                    .to_string()
            })
            .collect();
        Self::from_base_labels(&bases)
    }

    /// Strict lookup: tags at batch time must already be known.
    pub fn lookup(&self, tag: &str) -> Result<u32> {
        self.tag2id
            .get(tag)
            .copied()
            .ok_or_else(|| KotobaError::config(format!("unknown tag {tag:?}")))
    }

    /// Exact inverse of [`lookup`](Self::lookup).
    pub fn tag_of(&self, id: u32) -> Option<&str> {
        self.id2tag.get(id as usize).map(String::as_str)
    }

    pub fn pad_id(&self) -> u32 {
        0
    }

    pub fn outside_id(&self) -> u32 {
        1
    }

    /// Number of tags, `<pad>` and `O` included.
    pub fn len(&self) -> usize {
        self.id2tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2tag.is_empty()
    }

    /// Persist as a JSON object mapping tag to id, sorted by tag.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| KotobaError::Resource {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::to_writer(BufWriter::new(file), &self.tag2id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(tokens: &[&str], tags: &[&str]) -> Example {
        Example::new(
            tokens.iter().map(|s| s.to_string()).collect(),
            tags.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn word_vocab_layout_and_coverage() {
        let examples = vec![
            example(&["the", "cat", "sat"], &["O", "B-NOUN", "B-VERB"]),
            example(&["the", "dog"], &["O", "B-NOUN"]),
        ];
        let vocab = WordVocab::build(&examples);

        assert_eq!(vocab.lookup(OOV_TOKEN), 0);
        assert_eq!(vocab.lookup(PAD_TOKEN), 1);
        // cat < dog < sat < the
        assert_eq!(vocab.lookup("cat"), 2);
        assert_eq!(vocab.lookup("dog"), 3);
        assert_eq!(vocab.lookup("sat"), 4);
        assert_eq!(vocab.lookup("the"), 5);
        assert_eq!(vocab.len(), 6);

        // Unseen words map to OOV, never crash
        assert_eq!(vocab.lookup("zebra"), vocab.oov_id());
    }

    #[test]
    fn word_vocab_is_deterministic() {
        let examples = vec![example(&["b", "a", "c"], &["O", "O", "O"])];
        let v1 = WordVocab::build(&examples);
        let v2 = WordVocab::build(&examples);
        let pairs1: Vec<_> = v1.iter().map(|(w, id)| (w.to_string(), id)).collect();
        let pairs2: Vec<_> = v2.iter().map(|(w, id)| (w.to_string(), id)).collect();
        assert_eq!(pairs1, pairs2);
    }

    #[test]
    fn word_vocab_save_is_byte_identical() {
        let examples = vec![example(&["b", "a"], &["O", "O"])];
        let dir = std::env::temp_dir().join("kotoba-vocab-test");
        std::fs::create_dir_all(&dir).unwrap();
        let p1 = dir.join("w1.json");
        let p2 = dir.join("w2.json");

        WordVocab::build(&examples).save(&p1).unwrap();
        WordVocab::build(&examples).save(&p2).unwrap();

        assert_eq!(std::fs::read(&p1).unwrap(), std::fs::read(&p2).unwrap());
        std::fs::remove_file(&p1).unwrap();
        std::fs::remove_file(&p2).unwrap();
    }

    #[test]
    fn label_vocab_fixed_layout() {
        // Scenario from the taxonomy contract: {NOUN, VERB}
        let vocab = LabelVocab::from_base_labels(&["VERB", "NOUN"]).unwrap();
        assert_eq!(vocab.lookup("<pad>").unwrap(), 0);
        assert_eq!(vocab.lookup("O").unwrap(), 1);
        assert_eq!(vocab.lookup("B-NOUN").unwrap(), 2);
        assert_eq!(vocab.lookup("I-NOUN").unwrap(), 3);
        assert_eq!(vocab.lookup("B-VERB").unwrap(), 4);
        assert_eq!(vocab.lookup("I-VERB").unwrap(), 5);
        assert_eq!(vocab.len(), 6);
    }

    #[test]
    fn label_vocab_size_and_inverse() {
        let vocab = LabelVocab::from_base_labels(&["LOC", "PER", "ORG"]).unwrap();
        assert_eq!(vocab.len(), 2 + 2 * 3);
        for id in 0..vocab.len() as u32 {
            let tag = vocab.tag_of(id).unwrap();
            assert_eq!(vocab.lookup(tag).unwrap(), id);
        }
        assert!(vocab.tag_of(vocab.len() as u32).is_none());
    }

    #[test]
    fn label_vocab_from_splits_strips_prefixes() {
        let train = Split {
            examples: vec![example(&["x"], &["B-PER"])],
        };
        let dev = Split {
            examples: vec![example(&["y", "z"], &["I-LOC", "O"])],
        };
        let vocab = LabelVocab::from_splits(&[&train, &dev]).unwrap();
        // Base set {LOC, PER}; the O tag is structural, not a base label
        assert_eq!(vocab.len(), 6);
        assert_eq!(vocab.lookup("B-LOC").unwrap(), 2);
        assert_eq!(vocab.lookup("B-PER").unwrap(), 4);
    }

    #[test]
    fn label_vocab_strict_lookup() {
        let vocab = LabelVocab::from_base_labels(&["NOUN"]).unwrap();
        assert!(matches!(
            vocab.lookup("B-VERB"),
            Err(KotobaError::Config { .. })
        ));
    }

    #[test]
    fn label_file_empty_is_config_error() {
        let dir = std::env::temp_dir().join("kotoba-label-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.labels");
        std::fs::write(&path, "\n\n").unwrap();

        assert!(matches!(
            LabelVocab::from_label_file(&path),
            Err(KotobaError::Config { .. })
        ));
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            LabelVocab::from_label_file("/nonexistent/labels.txt"),
            Err(KotobaError::Config { .. })
        ));
    }
}
