//! Labeled-utterance corpora stored as JSON Lines.
//!
//! Two readers exist because the two consumers have different contracts:
//! - [`read_seed_corpus`] is strict: every non-blank line must be a
//!   `{"text", "label"}` object with non-empty fields.
//! - [`load_training_corpus`] is lenient about field names (`text`/`message`,
//!   `label`/`intent`) and silently drops incomplete rows, but still fails on
//!   malformed JSON and on an empty result.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokenizers::NormalizedString;

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Malformed JSON on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid example on line {line}: {reason}")]
    InvalidExample { line: usize, reason: String },
    #[error("No data in {0}")]
    Empty(String),
    #[error("Failed to serialize example: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A single utterance and its intent label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledExample {
    pub text: String,
    pub label: String,
}

impl LabeledExample {
    /// Builds an example with both fields NFC-normalized.
    pub fn new(text: impl AsRef<str>, label: impl AsRef<str>) -> Self {
        Self {
            text: nfc(text.as_ref()),
            label: nfc(label.as_ref()),
        }
    }

    /// Returns a copy with both fields NFC-normalized.
    pub fn normalized(&self) -> Self {
        Self::new(&self.text, &self.label)
    }

    pub fn is_valid(&self) -> bool {
        !self.text.trim().is_empty() && !self.label.trim().is_empty()
    }
}

/// Unicode NFC normalization.
pub fn nfc(s: &str) -> String {
    let mut normalized = NormalizedString::from(s);
    normalized.nfc();
    normalized.get().to_string()
}

/// Reads a seed corpus. Any malformed line aborts the read.
pub fn read_seed_corpus(path: impl AsRef<Path>) -> Result<Vec<LabeledExample>, CorpusError> {
    let path = path.as_ref();
    debug!("Reading seed corpus from {:?}", path);
    let reader = BufReader::new(File::open(path)?);

    let mut examples = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let example: LabeledExample = serde_json::from_str(&line)
            .map_err(|source| CorpusError::Parse { line: idx + 1, source })?;
        let example = example.normalized();
        if !example.is_valid() {
            return Err(CorpusError::InvalidExample {
                line: idx + 1,
                reason: "text and label must be non-empty".into(),
            });
        }
        examples.push(example);
    }

    info!("Loaded {} seed examples from {:?}", examples.len(), path);
    Ok(examples)
}

/// Reads a training corpus, accepting `message` for `text` and `intent` for
/// `label`. Rows missing either field are dropped.
pub fn load_training_corpus(path: impl AsRef<Path>) -> Result<Vec<LabeledExample>, CorpusError> {
    let path = path.as_ref();
    debug!("Reading training corpus from {:?}", path);
    let reader = BufReader::new(File::open(path)?);

    let mut examples = Vec::new();
    let mut dropped = 0usize;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .map_err(|source| CorpusError::Parse { line: idx + 1, source })?;

        let text = first_non_empty(&value, &["text", "message"]);
        let label = first_non_empty(&value, &["label", "intent"]);
        match (text, label) {
            (Some(text), Some(label)) => examples.push(LabeledExample {
                text: text.to_string(),
                label: label.to_string(),
            }),
            _ => dropped += 1,
        }
    }

    if examples.is_empty() {
        return Err(CorpusError::Empty(path.display().to_string()));
    }
    if dropped > 0 {
        info!("Dropped {} rows without text or label", dropped);
    }
    info!("Loaded {} training examples from {:?}", examples.len(), path);
    Ok(examples)
}

fn first_non_empty<'a>(value: &'a serde_json::Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .find(|s| !s.is_empty())
}

/// Writes one JSON object per line. Non-ASCII text is kept literal.
pub fn write_corpus(path: impl AsRef<Path>, examples: &[LabeledExample]) -> Result<(), CorpusError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    for example in examples {
        serde_json::to_writer(&mut writer, example)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Per-label example counts, ordered by label.
pub fn label_counts(examples: &[LabeledExample]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for example in examples {
        *counts.entry(example.label.as_str()).or_insert(0) += 1;
    }
    counts
}
