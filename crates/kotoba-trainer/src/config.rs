//! Run configuration for a training run.
//!
//! Built once from the command line, serialized verbatim into the
//! checkpoint artifact set, and threaded by reference into every
//! component that needs it. Never global, never mutated.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use kotoba_core::error::{KotobaError, Result};

/// Supported sequence encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Stacked LSTM encoder.
    Lstm,
}

/// Supported classification heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// Linear projection plus softmax over tags.
    Softmax,
}

/// Supported optimizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

/// All configurable parameters of a run.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "train",
    about = "Train and evaluate a sequence-labeling tagger"
)]
pub struct TrainConfig {
    /// Path to the training split (JSON with seq_ins/seq_outs).
    #[arg(long)]
    pub train_path: PathBuf,

    /// Path to the validation split.
    #[arg(long)]
    pub dev_path: PathBuf,

    /// Path to the test split.
    #[arg(long)]
    pub test_path: PathBuf,

    /// Optional label-list file, one base label per line. When absent the
    /// label set is derived from the train/dev/test tag sequences.
    #[arg(long)]
    pub label_set_path: Option<PathBuf>,

    /// Directory receiving the checkpoint artifact set.
    #[arg(long = "model")]
    pub model_dir: PathBuf,

    /// Optional path for the rendered predictions; a scratch file is used
    /// when absent.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Path to the external evaluation script.
    #[arg(long, default_value = "./eval/conlleval.pl")]
    pub script: PathBuf,

    /// Pretrained word-vector file (GloVe text format).
    #[arg(long)]
    pub word_embedding: Option<PathBuf>,

    /// Cache directory consulted before downloading vectors from the
    /// remote provider.
    #[arg(long)]
    pub embedding_cache: Option<PathBuf>,

    /// Random seed for shuffling and parameter init.
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    #[arg(long, value_enum, default_value_t = EncoderKind::Lstm)]
    pub encoder: EncoderKind,

    #[arg(long, value_enum, default_value_t = ClassifierKind::Softmax)]
    pub classifier: ClassifierKind,

    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    pub optimizer: OptimizerKind,

    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 128)]
    pub hidden_dim: usize,

    #[arg(long, default_value_t = 100)]
    pub max_epoch: usize,

    #[arg(long, default_value_t = 300)]
    pub word_dim: usize,

    #[arg(long, default_value_t = 0.5)]
    pub dropout: f32,

    /// Number of stacked encoder layers.
    #[arg(long, default_value_t = 2)]
    pub depth: usize,

    #[arg(long, default_value_t = 0.01)]
    pub lr: f64,

    /// Multiplicative learning-rate decay applied after every epoch;
    /// 0 disables decay.
    #[arg(long, default_value_t = 0.0)]
    pub lr_decay: f64,

    /// Gradient-norm bound applied before every optimizer step.
    #[arg(long, default_value_t = 5.0)]
    pub clip_grad: f64,

    /// Log running training loss every this many batches.
    #[arg(long, default_value_t = 8)]
    pub log_interval: usize,
}

impl TrainConfig {
    /// Persist the full configuration as part of the artifact set.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| KotobaError::Resource {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}
