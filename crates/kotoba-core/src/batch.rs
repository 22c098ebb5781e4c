//! # Length-bucketed batch formation
//!
//! Packs variable-length sentences into fixed-shape padded tensor pairs.
//! Sorting by descending length before slicing keeps similar lengths
//! together, minimizing padding waste; the finished batch list is then
//! permuted so training never sees a monotonic short-to-long curriculum.

use candle_core::{Device, Tensor};
use oorandom::Rand32;
use tracing::info;

use crate::dataset::Example;
use crate::error::{KotobaError, Result};
use crate::vocab::{LabelVocab, WordVocab};

/// A fixed-shape padded batch.
///
/// `tokens` and `tags` are `(batch, max_len)` U32 tensors. Positions past
/// an example's true length hold the respective pad ids. `text` keeps the
/// original token strings for rendering predictions.
#[derive(Debug, Clone)]
pub struct Batch {
    pub tokens: Tensor,
    pub tags: Tensor,
    pub lens: Vec<usize>,
    pub text: Vec<Vec<String>>,
}

impl Batch {
    /// Number of examples in the batch.
    pub fn len(&self) -> usize {
        self.lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lens.is_empty()
    }

    /// Width of the padded tensors (the batch's own max length).
    pub fn max_len(&self) -> usize {
        self.lens.iter().copied().max().unwrap_or(0)
    }
}

/// How to slice a corpus into batches.
#[derive(Debug, Clone, Copy)]
pub struct BatchPlan {
    pub batch_size: usize,
    /// Globally reshuffle examples before bucketing.
    pub shuffle: bool,
    /// Sort by descending length before slicing, then permute whole batches.
    pub sort_by_len: bool,
}

impl BatchPlan {
    /// Plan for training epochs: full reshuffle plus length bucketing.
    pub fn training(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: true,
            sort_by_len: true,
        }
    }

    /// Plan for dev/test evaluation: stable corpus order, no bucketing.
    pub fn evaluation(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            sort_by_len: false,
        }
    }
}

/// In-place Fisher-Yates shuffle driven by the run's seeded RNG.
fn shuffle_in_place<T>(items: &mut [T], rng: &mut Rand32) {
    for i in (1..items.len()).rev() {
        let j = rng.rand_range(0..(i as u32 + 1)) as usize;
        items.swap(i, j);
    }
}

/// Slice a corpus into padded batches according to `plan`.
///
/// Token ids fall back to the OOV id for unseen words; tag lookup is
/// strict. The last batch may be shorter than `batch_size` but is never
/// dropped. An empty corpus is a configuration error.
pub fn make_batches(
    examples: &[Example],
    words: &WordVocab,
    labels: &LabelVocab,
    plan: BatchPlan,
    rng: &mut Rand32,
    device: &Device,
) -> Result<Vec<Batch>> {
    if examples.is_empty() {
        return Err(KotobaError::config("cannot batch an empty corpus"));
    }
    if plan.batch_size == 0 {
        return Err(KotobaError::config("batch size must be at least 1"));
    }

    let mut order: Vec<usize> = (0..examples.len()).collect();
    if plan.shuffle {
        shuffle_in_place(&mut order, rng);
    }
    if plan.sort_by_len {
        // Stable so the shuffled order breaks ties
        order.sort_by_key(|&i| std::cmp::Reverse(examples[i].len()));
    }

    let mut batches = Vec::with_capacity(order.len().div_ceil(plan.batch_size));
    let mut sum_len = 0usize;
    for chunk in order.chunks(plan.batch_size) {
        let batch = build_batch(examples, chunk, words, labels, plan.sort_by_len, device)?;
        sum_len += batch.lens.iter().sum::<usize>();
        batches.push(batch);
    }

    // Length-sorted batches would otherwise feed the model a systematic
    // long-to-short curriculum within every epoch.
    if plan.sort_by_len {
        shuffle_in_place(&mut batches, rng);
    }

    info!(
        batches = batches.len(),
        avg_len = format!("{:.1}", sum_len as f64 / examples.len() as f64),
        "bucketed corpus"
    );
    Ok(batches)
}

/// Encode and pad one chunk of examples into a [`Batch`].
fn build_batch(
    examples: &[Example],
    chunk: &[usize],
    words: &WordVocab,
    labels: &LabelVocab,
    sort: bool,
    device: &Device,
) -> Result<Batch> {
    let mut order: Vec<usize> = chunk.to_vec();
    if sort {
        order.sort_by_key(|&i| std::cmp::Reverse(examples[i].len()));
    }

    let batch_size = order.len();
    let lens: Vec<usize> = order.iter().map(|&i| examples[i].len()).collect();
    let max_len = lens.iter().copied().max().unwrap_or(0);

    let mut token_ids = vec![words.pad_id(); batch_size * max_len];
    let mut tag_ids = vec![labels.pad_id(); batch_size * max_len];
    let mut text = Vec::with_capacity(batch_size);

    for (row, &i) in order.iter().enumerate() {
        let example = &examples[i];
        for (col, token) in example.tokens.iter().enumerate() {
            token_ids[row * max_len + col] = words.lookup(token);
        }
        for (col, tag) in example.tags.iter().enumerate() {
            tag_ids[row * max_len + col] = labels.lookup(tag)?;
        }
        text.push(example.tokens.clone());
    }

    let tokens = Tensor::from_vec(token_ids, (batch_size, max_len), device)?;
    let tags = Tensor::from_vec(tag_ids, (batch_size, max_len), device)?;

    Ok(Batch {
        tokens,
        tags,
        lens,
        text,
    })
}
