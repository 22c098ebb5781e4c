//! # Kotoba Core
//!
//! Data-preparation primitives for token-level sequence labeling (POS
//! tagging, BIO chunking): deterministic word and label vocabularies,
//! dataset loading, and length-bucketed padded batching.
//!
//! ## Quick Start
//!
//! ```rust
//! use kotoba_core::{Example, LabelVocab, WordVocab};
//!
//! let examples = vec![Example::new(
//!     vec!["the".into(), "cat".into()],
//!     vec!["O".into(), "B-NOUN".into()],
//! )
//! .unwrap()];
//!
//! let words = WordVocab::build(&examples);
//! let labels = LabelVocab::from_base_labels(&["NOUN"]).unwrap();
//!
//! assert_eq!(words.lookup("unseen"), words.oov_id());
//! assert_eq!(labels.lookup("B-NOUN").unwrap(), 2);
//! ```
pub mod batch;
pub mod dataset;
pub mod error;
pub mod vocab;

// Re-export primary API
pub use batch::{make_batches, Batch, BatchPlan};
pub use dataset::{Example, Split};
pub use error::{KotobaError, Result};
pub use vocab::{LabelVocab, WordVocab, OOV_TOKEN, OUTSIDE_LABEL, PAD_LABEL, PAD_TOKEN};
