//! # Kotoba Trainer
//!
//! Training orchestration for the kotoba sequence tagger: run
//! configuration, pretrained embeddings, the candle LSTM tagger model,
//! external conlleval-style scoring, and the epoch loop with best-model
//! checkpointing.

pub mod config;
pub mod embeddings;
pub mod evaluator;
pub mod model;
pub mod trainer;

// Re-export primary API
pub use config::{ClassifierKind, EncoderKind, OptimizerKind, TrainConfig};
pub use evaluator::{Scores, evaluate, parse_scores, render_batch};
pub use model::{Mode, Tagger};
pub use trainer::{BestTracker, Optim, clip_grad_norm, train_and_test};
