use anyhow::{bail, Result};
use clap::Parser;
use ngram_core::{load_ngrams, ModelStats};
use ngram_tools::{init_logging, split_tokens};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
struct Args {
    /// saved model file
    model: PathBuf,

    /// n-gram order the model was trained with
    #[arg(long, default_value_t = 4)]
    order: usize,

    /// tokens to learn on top of the stored context before ranking
    #[arg(long)]
    context: Option<String>,

    /// candidate next tokens to rank
    #[arg(long, num_args = 1..)]
    candidates: Vec<String>,
}

#[derive(Serialize)]
struct Ranked {
    token: String,
    score: f64,
}

#[derive(Serialize)]
struct Report {
    stats: ModelStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    prefix: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ranking: Vec<Ranked>,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    if !args.model.exists() {
        bail!("model file {} does not exist", args.model.display());
    }
    let mut runner = load_ngrams(Some(&args.model), args.order)?;
    if let Some(context) = &args.context {
        for token in split_tokens(context) {
            runner.learn_next_token(&token);
        }
    }

    let (prefix, ranking) = if args.candidates.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        let scorer = runner.create_scorer();
        let ranking = scorer
            .rank(args.candidates.iter())
            .into_iter()
            .map(|(token, score)| Ranked {
                token: token.clone(),
                score,
            })
            .collect();
        (scorer.prefix().to_vec(), ranking)
    };

    let report = Report {
        stats: runner.stats(),
        prefix,
        ranking,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
