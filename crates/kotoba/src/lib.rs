//! # Kotoba
//!
//! Trainable token-level sequence labeling (POS tagging, BIO chunking):
//! deterministic vocabularies, length-bucketed batching, an LSTM tagger
//! on candle, and a training loop scored by the external conlleval
//! script.
//!
//! This crate re-exports the full public API of the workspace.

pub use kotoba_core::{
    Batch, BatchPlan, Example, KotobaError, LabelVocab, Result, Split, WordVocab, make_batches,
};
pub use kotoba_trainer::{
    BestTracker, ClassifierKind, EncoderKind, Mode, OptimizerKind, Scores, Tagger, TrainConfig,
    evaluate, train_and_test,
};
