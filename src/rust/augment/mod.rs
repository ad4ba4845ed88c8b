//! Template-based corpus augmentation.
//!
//! The augmenter keeps every seed example and adds `per_label` synthetic
//! utterances for each label found in the seed set. Labels are visited in
//! sorted order and all randomness comes from one seeded RNG, so a given seed
//! file, `per_label` and seed value always produce the same output.

pub mod lexicon;
pub mod templates;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::corpus::{read_seed_corpus, write_corpus, CorpusError, LabeledExample};
use templates::{pick, templates_for, SlotValues};

pub const DEFAULT_PER_LABEL: usize = 1500;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone)]
pub struct AugmentConfig {
    /// Synthetic examples generated per seed label
    pub per_label: usize,
    /// RNG seed for template draws and the final shuffle
    pub seed: u64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            per_label: DEFAULT_PER_LABEL,
            seed: DEFAULT_SEED,
        }
    }
}

/// Summary of an augmentation run.
#[derive(Debug, Clone, Default)]
pub struct AugmentReport {
    pub seed_examples: usize,
    pub synthetic: BTreeMap<String, usize>,
    pub total: usize,
}

pub struct Augmenter {
    rng: StdRng,
}

impl Augmenter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generates `n` utterances for `label`. Labels without templates yield
    /// nothing.
    pub fn generate_for_label(&mut self, label: &str, n: usize) -> Vec<LabeledExample> {
        let Some(templates) = templates_for(label) else {
            return Vec::new();
        };

        (0..n)
            .map(|_| {
                let values = SlotValues::draw(&mut self.rng);
                let template = pick(&mut self.rng, templates);
                LabeledExample::new(template.render(&values, &mut self.rng), label)
            })
            .collect()
    }

    /// Merges the seed set with synthetic examples and shuffles the result.
    pub fn augment(
        &mut self,
        seed: Vec<LabeledExample>,
        per_label: usize,
    ) -> (Vec<LabeledExample>, AugmentReport) {
        let labels: BTreeSet<String> = seed.iter().map(|e| e.label.clone()).collect();

        let mut report = AugmentReport {
            seed_examples: seed.len(),
            ..Default::default()
        };
        let mut data: Vec<LabeledExample> = seed.iter().map(LabeledExample::normalized).collect();

        for label in &labels {
            let generated = self.generate_for_label(label, per_label);
            if generated.is_empty() && per_label > 0 {
                warn!("No templates for label '{}', keeping seed examples only", label);
            }
            report.synthetic.insert(label.clone(), generated.len());
            data.extend(generated);
        }

        data.shuffle(&mut self.rng);
        report.total = data.len();
        (data, report)
    }
}

/// Reads the seed file, augments it and writes the combined corpus.
pub fn augment_file(
    seed_path: impl AsRef<Path>,
    out_path: impl AsRef<Path>,
    config: &AugmentConfig,
) -> Result<AugmentReport, CorpusError> {
    let seed = read_seed_corpus(seed_path)?;
    let mut augmenter = Augmenter::new(config.seed);
    let (data, report) = augmenter.augment(seed, config.per_label);

    for (label, count) in &report.synthetic {
        info!("  {}: +{} synthetic", label, count);
    }
    write_corpus(out_path, &data)?;
    Ok(report)
}
