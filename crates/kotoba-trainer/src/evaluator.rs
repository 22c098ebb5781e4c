//! # External scoring
//!
//! Renders predictions in the conlleval column format, feeds them to the
//! external scoring script over stdin, and parses precision/recall/F1
//! from its output. Any deviation from the expected output shape is a
//! scoring error, never a silent zero.

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tempdir::TempDir;
use tracing::debug;

use kotoba_core::batch::Batch;
use kotoba_core::error::{KotobaError, Result};
use kotoba_core::vocab::LabelVocab;

use crate::model::{Mode, Tagger};

/// Precision, recall, and F1 as reported by the scorer, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Render one batch in scorer format: one `index word true_tag
/// predicted_tag` line per real token, a blank line after each sentence.
pub fn render_batch(
    batch: &Batch,
    predictions: &[Vec<u32>],
    labels: &LabelVocab,
) -> Result<String> {
    let gold = batch.tags.to_vec2::<u32>()?;
    let mut out = String::new();

    for (row, &len) in batch.lens.iter().enumerate() {
        for k in 0..len {
            let word = &batch.text[row][k];
            let true_tag = labels.tag_of(gold[row][k]).ok_or_else(|| {
                KotobaError::scoring(format!("gold id {} has no tag", gold[row][k]))
            })?;
            let pred_tag = labels.tag_of(predictions[row][k]).ok_or_else(|| {
                KotobaError::scoring(format!("predicted id {} has no tag", predictions[row][k]))
            })?;
            let _ = writeln!(out, "{} {} {} {}", k + 1, word, true_tag, pred_tag);
        }
        out.push('\n');
    }

    Ok(out)
}

/// Parse the scorer's stdout.
///
/// The second line must look like
/// `accuracy:  97.00%;  precision:  85.00%;  recall:  80.00%;  FB1:  82.44`;
/// the three metrics sit at fixed word offsets behind their field labels.
pub fn parse_scores(stdout: &str) -> Result<Scores> {
    let line = stdout
        .lines()
        .nth(1)
        .ok_or_else(|| KotobaError::scoring("scorer output has fewer than two lines"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();

    if fields.len() < 8
        || fields[2] != "precision:"
        || fields[4] != "recall:"
        || fields[6] != "FB1:"
    {
        return Err(KotobaError::scoring(format!(
            "unexpected scorer summary line: {line:?}"
        )));
    }

    let metric = |raw: &str, name: &str| -> Result<f64> {
        raw.trim_end_matches(';')
            .trim_end_matches('%')
            .parse()
            .map_err(|_| KotobaError::scoring(format!("cannot parse {name} from {raw:?}")))
    };

    Ok(Scores {
        precision: metric(fields[3], "precision")?,
        recall: metric(fields[5], "recall")?,
        f1: metric(fields[7], "F1")?,
    })
}

/// Evaluate the model on a set of batches through the external scorer.
///
/// Predictions are rendered to `output` when given, otherwise to a scratch
/// file that is removed when this function returns, on success and on
/// failure alike.
pub fn evaluate(
    model: &Tagger,
    batches: &[Batch],
    labels: &LabelVocab,
    script: &Path,
    output: Option<&Path>,
) -> Result<Scores> {
    // Held until return so the scratch dir outlives the subprocess
    let mut scratch = None;
    let rendered_path = match output {
        Some(path) => path.to_path_buf(),
        None => {
            let dir = TempDir::new("kotoba-eval").map_err(|e| KotobaError::Resource {
                path: std::env::temp_dir(),
                source: e,
            })?;
            let path = dir.path().join("predictions.txt");
            scratch = Some(dir);
            path
        }
    };

    let file = File::create(&rendered_path).map_err(|e| KotobaError::Resource {
        path: rendered_path.clone(),
        source: e,
    })?;
    let mut writer = std::io::BufWriter::new(file);
    for batch in batches {
        let (predictions, _) = model.forward(batch, Mode::Eval)?;
        let rendered = render_batch(batch, &predictions, labels)?;
        writer
            .write_all(rendered.as_bytes())
            .map_err(|e| KotobaError::Resource {
                path: rendered_path.clone(),
                source: e,
            })?;
    }
    writer.flush().map_err(|e| KotobaError::Resource {
        path: rendered_path.clone(),
        source: e,
    })?;
    drop(writer);

    let stdin = File::open(&rendered_path).map_err(|e| KotobaError::Resource {
        path: rendered_path.clone(),
        source: e,
    })?;
    let scored = Command::new("perl")
        .arg(script)
        .stdin(Stdio::from(stdin))
        .output()
        .map_err(|e| KotobaError::scoring(format!("failed to launch scorer {script:?}: {e}")))?;

    if !scored.status.success() {
        return Err(KotobaError::scoring(format!(
            "scorer {script:?} exited with {}",
            scored.status
        )));
    }

    let stdout = String::from_utf8_lossy(&scored.stdout);
    debug!(script = ?script, "scorer output:\n{stdout}");
    let scores = parse_scores(&stdout)?;

    drop(scratch);
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use kotoba_core::batch::{BatchPlan, make_batches};
    use kotoba_core::dataset::Example;
    use kotoba_core::vocab::WordVocab;
    use oorandom::Rand32;

    const SCORER_OUTPUT: &str = "processed 8 tokens with 3 phrases; found: 4 phrases; correct: 3.\n\
        accuracy:  97.00%;  precision:  85.00%;  recall:  80.00%;  FB1:  82.44\n\
        \x20             NOUN: precision:  90.00%;  recall:  85.00%;  FB1:  87.43  2\n";

    #[test]
    fn parses_conlleval_summary_line() {
        let scores = parse_scores(SCORER_OUTPUT).unwrap();
        assert_eq!(scores.precision, 85.00);
        assert_eq!(scores.recall, 80.00);
        assert_eq!(scores.f1, 82.44);
    }

    #[test]
    fn rejects_truncated_output() {
        let result = parse_scores("processed 8 tokens\n");
        assert!(matches!(result, Err(KotobaError::Scoring { .. })));
    }

    #[test]
    fn rejects_shifted_field_labels() {
        let result = parse_scores(
            "header\naccuracy:  97.00%;  exactness:  85.00%;  recall:  80.00%;  FB1:  82.44\n",
        );
        assert!(matches!(result, Err(KotobaError::Scoring { .. })));
    }

    #[test]
    fn rejects_non_numeric_metric() {
        let result = parse_scores(
            "header\naccuracy:  x%;  precision:  nope%;  recall:  80.00%;  FB1:  82.44\n",
        );
        assert!(matches!(result, Err(KotobaError::Scoring { .. })));
    }

    #[test]
    fn renders_real_tokens_only_with_sentence_breaks() {
        let examples = vec![
            Example::new(
                vec!["the".into(), "cat".into()],
                vec!["O".into(), "B-NOUN".into()],
            )
            .unwrap(),
            Example::new(vec!["runs".into()], vec!["B-VERB".into()]).unwrap(),
        ];
        let words = WordVocab::build(&examples);
        let labels = LabelVocab::from_base_labels(&["NOUN", "VERB"]).unwrap();
        let mut rng = Rand32::new(1);
        let batches = make_batches(
            &examples,
            &words,
            &labels,
            BatchPlan::evaluation(2),
            &mut rng,
            &Device::Cpu,
        )
        .unwrap();

        // Pretend the model tagged everything O; row width is the batch max
        let predictions = vec![vec![1, 1], vec![1, 1]];
        let rendered = render_batch(&batches[0], &predictions, &labels).unwrap();

        assert_eq!(
            rendered,
            "1 the O O\n2 cat B-NOUN O\n\n1 runs B-VERB O\n\n"
        );
    }

    #[test]
    fn render_rejects_out_of_range_prediction() {
        let examples = vec![Example::new(vec!["x".into()], vec!["O".into()]).unwrap()];
        let words = WordVocab::build(&examples);
        let labels = LabelVocab::from_base_labels(&["NOUN"]).unwrap();
        let mut rng = Rand32::new(1);
        let batches = make_batches(
            &examples,
            &words,
            &labels,
            BatchPlan::evaluation(1),
            &mut rng,
            &Device::Cpu,
        )
        .unwrap();

        let predictions = vec![vec![99]];
        let result = render_batch(&batches[0], &predictions, &labels);
        assert!(matches!(result, Err(KotobaError::Scoring { .. })));
    }
}
