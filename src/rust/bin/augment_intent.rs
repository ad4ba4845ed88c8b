use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;
use vi_intent::augment::{DEFAULT_PER_LABEL, DEFAULT_SEED};
use vi_intent::{augment_file, AugmentConfig};

/// Expand a seed intent corpus with template-generated utterances
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seed corpus (JSON Lines with text and label)
    #[arg(long)]
    seed: PathBuf,

    /// Output corpus
    #[arg(long)]
    out: PathBuf,

    /// Synthetic examples per seed label
    #[arg(long = "per_label", default_value_t = DEFAULT_PER_LABEL)]
    per_label: usize,

    /// RNG seed for template draws and shuffling
    #[arg(long = "seed_value", default_value_t = DEFAULT_SEED)]
    seed_value: u64,
}

impl From<&Args> for AugmentConfig {
    fn from(args: &Args) -> Self {
        Self {
            per_label: args.per_label,
            seed: args.seed_value,
        }
    }
}

fn main() -> anyhow::Result<()> {
    vi_intent::init_logger();
    let args = Args::parse();

    info!("Augmenting {} ({} per label)", args.seed.display(), args.per_label);
    let report = augment_file(&args.seed, &args.out, &AugmentConfig::from(&args))
        .with_context(|| format!("augmenting {}", args.seed.display()))?;
    info!("{} seed + {} synthetic", report.seed_examples, report.total - report.seed_examples);

    println!("Wrote {} lines -> {}", report.total, args.out.display());
    Ok(())
}
