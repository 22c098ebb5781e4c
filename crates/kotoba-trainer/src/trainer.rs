//! # Training orchestration
//!
//! Drives the whole run: vocabulary construction, embedding setup, the
//! epoch loop with gradient clipping, validation scoring through the
//! external scorer, and best-model checkpointing.

use candle_core::backprop::GradStore;
use candle_core::{Device, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD};
use oorandom::Rand32;
use tracing::info;

use kotoba_core::batch::{BatchPlan, make_batches};
use kotoba_core::dataset::{Example, Split};
use kotoba_core::error::{KotobaError, Result};
use kotoba_core::vocab::{LabelVocab, WordVocab};

use crate::config::{OptimizerKind, TrainConfig};
use crate::embeddings::{PretrainedVectors, build_embedding_matrix, locate_vectors};
use crate::evaluator::{Scores, evaluate};
use crate::model::{Mode, Tagger};

/// Checkpoint file name inside the artifact directory.
const PARAMS_FILE: &str = "model.safetensors";

/// Optimizer bound to the model parameters.
pub enum Optim {
    Adam(AdamW),
    Sgd(SGD),
}

impl Optim {
    pub fn new(kind: OptimizerKind, vars: Vec<Var>, lr: f64) -> Result<Self> {
        Ok(match kind {
            OptimizerKind::Adam => Optim::Adam(AdamW::new(
                vars,
                ParamsAdamW {
                    lr,
                    ..Default::default()
                },
            )?),
            OptimizerKind::Sgd => Optim::Sgd(SGD::new(vars, lr)?),
        })
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Optim::Adam(o) => o.step(grads)?,
            Optim::Sgd(o) => o.step(grads)?,
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Optim::Adam(o) => o.learning_rate(),
            Optim::Sgd(o) => o.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Optim::Adam(o) => o.set_learning_rate(lr),
            Optim::Sgd(o) => o.set_learning_rate(lr),
        }
    }
}

/// Scale gradients so their global L2 norm does not exceed `max_norm`.
/// Returns the pre-clip norm.
pub fn clip_grad_norm(vars: &[Var], grads: &mut GradStore, max_norm: f64) -> Result<f64> {
    let mut total = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var) {
            total += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = total.sqrt();

    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        for var in vars {
            if let Some(grad) = grads.get(var) {
                let scaled = (grad * scale)?;
                grads.insert(var, scaled);
            }
        }
    }
    Ok(norm)
}

/// Best-validation bookkeeping for the checkpoint decision.
///
/// A checkpoint is written if and only if the validation F1 strictly
/// exceeds every previous epoch's; the reported test figures are the ones
/// measured at that best point.
#[derive(Debug, Clone)]
pub struct BestTracker {
    best_valid: f64,
    best_test: Option<Scores>,
}

impl BestTracker {
    pub fn new() -> Self {
        Self {
            best_valid: f64::NEG_INFINITY,
            best_test: None,
        }
    }

    /// Record a validation F1; true when it strictly beats the best so far.
    pub fn improved(&mut self, valid_f1: f64) -> bool {
        if valid_f1 > self.best_valid {
            self.best_valid = valid_f1;
            true
        } else {
            false
        }
    }

    /// Record the test scores measured at the latest improvement.
    pub fn record_test(&mut self, scores: Scores) {
        self.best_test = Some(scores);
    }

    pub fn best_valid(&self) -> f64 {
        self.best_valid
    }

    pub fn best_test(&self) -> Option<Scores> {
        self.best_test
    }
}

impl Default for BestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// One training epoch: re-bucket with a full reshuffle, then iterate
/// batches with gradient clipping before every optimizer step.
fn train_epoch(
    epoch: usize,
    config: &TrainConfig,
    model: &Tagger,
    optimizer: &mut Optim,
    examples: &[Example],
    words: &WordVocab,
    labels: &LabelVocab,
    rng: &mut Rand32,
    device: &Device,
) -> Result<f64> {
    let batches = make_batches(
        examples,
        words,
        labels,
        BatchPlan::training(config.batch_size),
        rng,
        device,
    )?;
    let vars = model.vars();
    let mut total_loss = 0f64;

    for (iter, batch) in batches.iter().enumerate() {
        let (_, loss) = model.forward(batch, Mode::Train)?;
        let loss = loss
            .ok_or_else(|| KotobaError::config("training forward pass produced no loss"))?;
        let mut grads = loss.backward()?;
        clip_grad_norm(&vars, &mut grads, config.clip_grad)?;
        optimizer.step(&grads)?;

        let batch_loss = loss.to_scalar::<f32>()? as f64;
        total_loss += batch_loss;

        if (iter + 1) % config.log_interval == 0 {
            info!(
                epoch,
                iter = iter + 1,
                lr = format!("{:.6}", optimizer.learning_rate()),
                train_ave_loss = format!("{batch_loss:.6}"),
                "training"
            );
        }
    }

    Ok(total_loss)
}

/// Run the full train/validate/test loop described by `config`.
pub fn train_and_test(config: &TrainConfig) -> Result<()> {
    let device = Device::Cpu;
    let mut rng = Rand32::new(config.seed);

    let train = Split::from_json_file(&config.train_path)?;
    let dev = Split::from_json_file(&config.dev_path)?;
    let test = Split::from_json_file(&config.test_path)?;
    info!(
        train = train.len(),
        dev = dev.len(),
        test = test.len(),
        "loaded dataset splits"
    );

    let words = WordVocab::build(&train.examples);
    let labels = match &config.label_set_path {
        Some(path) => {
            info!(path = ?path, "loading label set from file");
            LabelVocab::from_label_file(path)?
        }
        None => {
            info!("deriving label set from train/dev/test tags");
            LabelVocab::from_splits(&[&train, &dev, &test])?
        }
    };
    info!(words = words.len(), tags = labels.len(), "built vocabularies");

    let pretrained = match locate_vectors(
        config.word_embedding.as_deref(),
        config.embedding_cache.as_deref(),
    )? {
        Some(path) => Some(PretrainedVectors::load_for_vocab(
            &path,
            config.word_dim,
            &words,
        )?),
        None => {
            info!("no pretrained vectors configured, embedding starts random");
            None
        }
    };
    let matrix = build_embedding_matrix(&words, config.word_dim, pretrained.as_ref(), &mut rng);

    let model = Tagger::new(config, words.len(), &labels, &device)?;
    model.set_embedding_matrix(matrix, words.len(), config.word_dim)?;

    // Artifact set: vocabularies and configuration are written together
    // before training so the directory is self-consistent from the start.
    std::fs::create_dir_all(&config.model_dir).map_err(|e| KotobaError::Resource {
        path: config.model_dir.clone(),
        source: e,
    })?;
    words.save(config.model_dir.join("word2id.json"))?;
    labels.save(config.model_dir.join("label2id.json"))?;
    config.save(config.model_dir.join("config.json"))?;

    let mut optimizer = Optim::new(config.optimizer, model.vars(), config.lr)?;

    let dev_batches = make_batches(
        &dev.examples,
        &words,
        &labels,
        BatchPlan::evaluation(config.batch_size),
        &mut rng,
        &device,
    )?;
    let test_batches = make_batches(
        &test.examples,
        &words,
        &labels,
        BatchPlan::evaluation(config.batch_size),
        &mut rng,
        &device,
    )?;

    let mut tracker = BestTracker::new();
    for epoch in 0..config.max_epoch {
        let train_loss = train_epoch(
            epoch,
            config,
            &model,
            &mut optimizer,
            &train.examples,
            &words,
            &labels,
            &mut rng,
            &device,
        )?;

        let dev_scores = evaluate(
            &model,
            &dev_batches,
            &labels,
            &config.script,
            config.output.as_deref(),
        )?;
        info!(
            epoch,
            lr = format!("{:.6}", optimizer.learning_rate()),
            train_loss = format!("{train_loss:.6}"),
            dev_f1 = dev_scores.f1,
            "validation complete"
        );

        if tracker.improved(dev_scores.f1) {
            let checkpoint = config.model_dir.join(PARAMS_FILE);
            model.save_params(&checkpoint)?;
            info!(epoch, path = ?checkpoint, "new record achieved, checkpoint written");

            let test_scores = evaluate(
                &model,
                &test_batches,
                &labels,
                &config.script,
                config.output.as_deref(),
            )?;
            info!(
                epoch,
                test_precision = test_scores.precision,
                test_recall = test_scores.recall,
                test_f1 = test_scores.f1,
                "test performance at new best"
            );
            tracker.record_test(test_scores);
        }

        if config.lr_decay > 0.0 {
            optimizer.set_learning_rate(optimizer.learning_rate() * config.lr_decay);
        }
    }

    info!(
        best_valid_f1 = tracker.best_valid(),
        "training finished"
    );
    if let Some(test) = tracker.best_test() {
        info!(
            test_precision = test.precision,
            test_recall = test.recall,
            test_f1 = test.f1,
            "test performance at best validation point"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_tracker_checkpoints_only_on_strict_improvement() {
        // Dev F1 over four epochs; checkpoints expected at epochs 0 and 1
        let sequence = [70.0, 72.5, 72.5, 68.0];
        let mut tracker = BestTracker::new();
        let mut decisions = Vec::new();
        let mut bests = Vec::new();

        for (epoch, &f1) in sequence.iter().enumerate() {
            let improved = tracker.improved(f1);
            if improved {
                tracker.record_test(Scores {
                    precision: 0.0,
                    recall: 0.0,
                    f1: 60.0 + epoch as f64,
                });
            }
            decisions.push(improved);
            bests.push(tracker.best_valid());
        }

        assert_eq!(decisions, vec![true, true, false, false]);
        // Recorded best is non-decreasing
        for pair in bests.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(tracker.best_valid(), 72.5);
        // Reported test figures are the ones measured at epoch 1
        assert_eq!(tracker.best_test().unwrap().f1, 61.0);
    }

    #[test]
    fn clip_grad_norm_bounds_the_global_norm() {
        let device = Device::Cpu;
        let var = Var::new(&[3f32, 4f32], &device).unwrap();
        let loss = (var.as_tensor() * 3.0).unwrap().sum_all().unwrap();
        let mut grads = loss.backward().unwrap();

        let vars = vec![var.clone()];
        let norm = clip_grad_norm(&vars, &mut grads, 1.0).unwrap();
        // d(sum(3x))/dx = [3, 3], norm = sqrt(18)
        assert!((norm - 18f64.sqrt()).abs() < 1e-4);

        let clipped = grads.get(&var).unwrap();
        let clipped_norm = clipped
            .sqr()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
            .sqrt();
        assert!((clipped_norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn clip_grad_norm_leaves_small_gradients_alone() {
        let device = Device::Cpu;
        let var = Var::new(&[0.1f32, 0.1f32], &device).unwrap();
        let loss = (var.as_tensor() * 0.5).unwrap().sum_all().unwrap();
        let mut grads = loss.backward().unwrap();

        let vars = vec![var.clone()];
        clip_grad_norm(&vars, &mut grads, 5.0).unwrap();

        let grad = grads.get(&var).unwrap().to_vec1::<f32>().unwrap();
        assert!((grad[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn optimizer_learning_rate_decays() {
        let device = Device::Cpu;
        let var = Var::new(&[1f32], &device).unwrap();
        let mut optim = Optim::new(OptimizerKind::Sgd, vec![var], 0.1).unwrap();
        assert!((optim.learning_rate() - 0.1).abs() < 1e-12);

        optim.set_learning_rate(optim.learning_rate() * 0.5);
        assert!((optim.learning_rate() - 0.05).abs() < 1e-12);
    }
}
