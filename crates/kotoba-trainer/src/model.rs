//! # Sequence tagger model
//!
//! Embedding, stacked LSTM encoder, and a linear-softmax classification
//! head over BIO tags. The orchestrator only depends on the forward
//! contract: `(predicted tag ids, loss)` with an explicit train/eval mode.

use candle_core::{D, DType, Device, Tensor, Var};
use candle_nn::{
    Dropout, Embedding, LSTM, LSTMConfig, Linear, Module, RNN, VarBuilder, VarMap, embedding,
    linear, lstm, ops,
};
use std::path::Path;

use kotoba_core::batch::Batch;
use kotoba_core::error::{KotobaError, Result};
use kotoba_core::vocab::LabelVocab;

use crate::config::{ClassifierKind, EncoderKind, TrainConfig};

/// Whether a forward pass trains or evaluates.
///
/// The mode is an explicit parameter of every forward call: dropout, loss
/// computation, and prediction masking are a pure function of it, never
/// hidden instance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Sequence encoder variants.
enum Encoder {
    Lstm { layers: Vec<LSTM> },
}

impl Encoder {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Encoder::Lstm { layers } => {
                let mut xs = xs.clone();
                for layer in layers {
                    let states = layer.seq(&xs)?;
                    xs = layer.states_to_tensor(&states)?;
                }
                Ok(xs)
            }
        }
    }
}

/// Classification head variants.
enum Classifier {
    Softmax { proj: Linear },
}

impl Classifier {
    fn logits(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Classifier::Softmax { proj } => Ok(proj.forward(xs)?),
        }
    }
}

/// The token tagger: embed, encode, classify per token.
pub struct Tagger {
    embedding: Embedding,
    dropout: Dropout,
    encoder: Encoder,
    classifier: Classifier,
    varmap: VarMap,
    device: Device,
    pad_label_id: u32,
    num_tags: usize,
}

impl Tagger {
    /// Build the model from the run configuration.
    ///
    /// Requires the pad label at id 0: the arg-max over ids `1..` is what
    /// guarantees the pad tag is never predicted. Any other pad position
    /// would silently admit pad predictions, so it is rejected here.
    pub fn new(
        config: &TrainConfig,
        vocab_size: usize,
        labels: &LabelVocab,
        device: &Device,
    ) -> Result<Self> {
        if labels.pad_id() != 0 {
            return Err(KotobaError::config(format!(
                "pad label must occupy id 0 to be excluded from predictions, got id {}",
                labels.pad_id()
            )));
        }
        let num_tags = labels.len();
        if num_tags < 2 {
            return Err(KotobaError::config("label vocabulary is too small"));
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let embedding = embedding(vocab_size, config.word_dim, vb.pp("embedding"))?;
        let dropout = Dropout::new(config.dropout);

        let encoder = match config.encoder {
            EncoderKind::Lstm => {
                let mut layers = Vec::with_capacity(config.depth);
                for layer_idx in 0..config.depth {
                    let in_dim = if layer_idx == 0 {
                        config.word_dim
                    } else {
                        config.hidden_dim
                    };
                    layers.push(lstm(
                        in_dim,
                        config.hidden_dim,
                        LSTMConfig {
                            layer_idx,
                            ..Default::default()
                        },
                        vb.pp("encoder"),
                    )?);
                }
                Encoder::Lstm { layers }
            }
        };

        let classifier = match config.classifier {
            ClassifierKind::Softmax => Classifier::Softmax {
                proj: linear(config.hidden_dim, num_tags, vb.pp("classifier"))?,
            },
        };

        Ok(Self {
            embedding,
            dropout,
            encoder,
            classifier,
            varmap,
            device: device.clone(),
            pad_label_id: labels.pad_id(),
            num_tags,
        })
    }

    /// Install a prebuilt row-major `(vocab_size, dim)` embedding matrix.
    pub fn set_embedding_matrix(
        &self,
        matrix: Vec<f32>,
        vocab_size: usize,
        dim: usize,
    ) -> Result<()> {
        let tensor = Tensor::from_vec(matrix, (vocab_size, dim), &self.device)?;
        let data = self.varmap.data().lock().unwrap();
        let var = data
            .get("embedding.weight")
            .ok_or_else(|| KotobaError::config("model has no embedding.weight variable"))?;
        var.set(&tensor)?;
        Ok(())
    }

    /// All trainable parameters, for the optimizer and gradient clipping.
    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Run the model over one batch.
    ///
    /// Training mode returns the masked mean negative log-likelihood over
    /// non-pad positions; evaluation mode returns no loss. Predictions are
    /// the per-position arg-max over tags with the pad tag excluded.
    /// Rows are padded to the batch width; callers cut them with the
    /// batch's true lengths.
    pub fn forward(&self, batch: &Batch, mode: Mode) -> Result<(Vec<Vec<u32>>, Option<Tensor>)> {
        let embedded = self.embedding.forward(&batch.tokens)?;
        let embedded = self.dropout.forward(&embedded, mode == Mode::Train)?;
        let encoded = self.encoder.forward(&embedded)?;
        let logits = self.classifier.logits(&encoded)?;

        // Arg-max over ids 1.. then shift back, so id 0 (pad) can never win
        let sliced = logits.narrow(D::Minus1, 1, self.num_tags - 1)?;
        let argmax = sliced.argmax(D::Minus1)?;
        let mut predictions = argmax.to_vec2::<u32>()?;
        for row in predictions.iter_mut() {
            for p in row.iter_mut() {
                *p += 1;
            }
        }

        let loss = match mode {
            Mode::Train => {
                let log_probs = ops::log_softmax(&logits, D::Minus1)?;
                let targets = batch.tags.unsqueeze(D::Minus1)?;
                let picked = log_probs.gather(&targets, D::Minus1)?.squeeze(D::Minus1)?;
                let mask = batch.tags.ne(self.pad_label_id)?.to_dtype(DType::F32)?;
                let total = picked.mul(&mask)?.sum_all()?.neg()?;
                let count = mask.sum_all()?;
                Some(total.div(&count)?)
            }
            Mode::Eval => None,
        };

        Ok((predictions, loss))
    }

    /// Persist model parameters, replacing any previous checkpoint
    /// atomically (write to a scratch name, then rename).
    pub fn save_params<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let scratch = path.with_extension("tmp");
        self.varmap.save(&scratch)?;
        std::fs::rename(&scratch, path).map_err(|e| KotobaError::Resource {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Restore model parameters from a checkpoint.
    pub fn load_params<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.varmap.load(path.as_ref())?;
        Ok(())
    }
}
