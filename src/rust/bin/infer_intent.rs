use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::debug;
use vi_intent::{InferConfig, IntentClassifier};

/// Classify one utterance with a trained bundle
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bundle directory written by train_intent
    #[arg(long = "model_dir", default_value = "models/intent_llm")]
    model_dir: PathBuf,

    /// Text to classify
    #[arg(long)]
    text: String,

    #[arg(long = "max_len", default_value_t = 128)]
    max_len: usize,

    /// Also list the k most probable labels
    #[arg(long = "top_k", default_value_t = 1)]
    top_k: usize,
}

fn main() -> anyhow::Result<()> {
    vi_intent::init_logger();
    let args = Args::parse();
    let config = InferConfig {
        model_dir: args.model_dir,
        max_len: args.max_len,
        top_k: args.top_k,
    };

    let classifier = IntentClassifier::builder()
        .with_bundle(&config.model_dir)?
        .with_max_len(config.max_len)
        .build()
        .with_context(|| format!("loading {}", config.model_dir.display()))?;
    debug!("Token type input: {}", classifier.uses_token_types());

    let prediction = classifier.predict(&args.text)?;
    println!("{}", serde_json::to_string(&prediction)?);
    if config.top_k > 1 {
        for (label, probability) in prediction.top_k(classifier.labels(), config.top_k) {
            println!("  {:<20} {:.4}", label, probability);
        }
    }
    Ok(())
}
