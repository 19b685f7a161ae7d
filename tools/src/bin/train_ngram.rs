use anyhow::Result;
use clap::Parser;
use ngram_core::{load_ngrams_with, save_ngrams, Config};
use ngram_tools::{init_logging, read_tokens};
use std::path::PathBuf;
use tracing::info;

// Feed token files through an incremental n-gram runner and save the result.
// Each input file is whitespace-tokenized and learned in order, continuing
// one stream across files.

#[derive(Parser)]
struct Args {
    /// token files (whitespace-separated tokens)
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// model configuration (TOML); missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// n-gram order, overrides the config file
    #[arg(long)]
    order: Option<usize>,

    /// existing model to continue training from
    #[arg(long)]
    model: Option<PathBuf>,

    #[arg(long, default_value = "ngram.bin")]
    out: PathBuf,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_toml(path)?,
        None => Config::default(),
    };
    if let Some(order) = args.order {
        config.order = order;
    }

    let mut runner = load_ngrams_with(args.model.as_deref(), config)?;
    let mut learned = 0usize;
    for input in &args.inputs {
        let tokens = read_tokens(input)?;
        for token in &tokens {
            runner.learn_next_token(token);
        }
        info!(file = %input.display(), tokens = tokens.len(), "learned");
        learned += tokens.len();
    }

    save_ngrams(&args.out, &runner)?;
    println!(
        "Learned {} tokens ({} in vocabulary), wrote {}",
        learned,
        runner.vocabulary().len(),
        args.out.display()
    );
    Ok(())
}
