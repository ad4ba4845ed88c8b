use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use log::info;
use vi_intent::TrainConfig;

/// Fine-tune an encoder on an intent corpus and export the bundle
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Training corpus (JSON Lines)
    #[arg(long)]
    data: PathBuf,

    /// Bundle output directory
    #[arg(long)]
    out: PathBuf,

    /// Base model: local directory or Hugging Face id
    #[arg(long, default_value = "xlm-roberta-large")]
    model: String,

    #[arg(long, default_value_t = 8)]
    epochs: usize,

    #[arg(long, default_value_t = 2e-5)]
    lr: f64,

    #[arg(long, default_value_t = 16)]
    batch: usize,

    #[arg(long = "max_len", default_value_t = 128)]
    max_len: usize,

    /// Exponent of the inverse-frequency class weights
    #[arg(long = "weight_power", default_value_t = 0.5)]
    weight_power: f64,

    /// Fraction of the corpus held out for evaluation
    #[arg(long = "eval_ratio", default_value_t = 0.1)]
    eval_ratio: f64,
}

impl From<Args> for TrainConfig {
    fn from(args: Args) -> Self {
        Self {
            base_model: args.model,
            epochs: args.epochs,
            learning_rate: args.lr,
            batch_size: args.batch,
            max_len: args.max_len,
            weight_power: args.weight_power,
            eval_ratio: args.eval_ratio,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vi_intent::init_logger();
    let args = Args::parse();
    let data = args.data.clone();
    let out = args.out.clone();
    let config = TrainConfig::from(args);

    let start = Instant::now();
    let report = vi_intent::train(&data, &out, &config)
        .await
        .with_context(|| format!("training on {}", data.display()))?;
    info!(
        "Trained {} epochs ({} steps) in {:.2?}, best accuracy {:.4}",
        report.epochs_run,
        report.steps,
        start.elapsed(),
        report.best_accuracy
    );

    println!("DONE -> {}", out.display());
    Ok(())
}
