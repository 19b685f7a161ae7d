//! Versioned binary persistence for [`NGramRunner`].
//!
//! A model file is a bincode-encoded header (magic + format version)
//! followed by a bincode-encoded record:
//!
//! - `Config` (order, lambda, vocabulary and window caps, renormalize threshold)
//! - vocabulary state (index counters, recency record, recent-token window,
//!   word-index table)
//! - trie counter
//! - the runner's `prev_tokens`
//!
//! Files written with another format version are rejected rather than
//! misread. Saving writes a sibling `.tmp` file and renames it over the
//! target, so an existing model survives a failed save.
use crate::ngram::NGramModel;
use crate::runner::NGramRunner;
use crate::trie::TrieCounter;
use crate::vocabulary::{VocabularySnapshot, VocabularyWithLimit};
use crate::Config;
use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAGIC: [u8; 4] = *b"NGRM";

/// Version of the on-disk layout written by [`save_ngrams`].
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    version: u32,
}

#[derive(Serialize)]
struct RunnerRecordRef<'a> {
    config: &'a Config,
    vocabulary: VocabularySnapshot,
    counter: &'a TrieCounter,
    prev_tokens: Vec<String>,
}

#[derive(Deserialize)]
struct RunnerRecord {
    config: Config,
    vocabulary: VocabularySnapshot,
    counter: TrieCounter,
    prev_tokens: Vec<String>,
}

/// Save `runner` to `path`, creating parent directories as needed.
pub fn save_ngrams<P: AsRef<Path>>(path: P, runner: &NGramRunner) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }

    let tmp = sibling_temp_path(path);
    let saved = write_model(&tmp, runner).and_then(|()| {
        std::fs::rename(&tmp, path)
            .with_context(|| format!("replace {} with {}", path.display(), tmp.display()))
    });
    if saved.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    saved?;

    debug!(path = %path.display(), vocabulary = runner.vocabulary().len(), "saved n-gram model");
    Ok(())
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_model(path: &Path, runner: &NGramRunner) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let header = Header {
        magic: MAGIC,
        version: FORMAT_VERSION,
    };
    let record = RunnerRecordRef {
        config: runner.config(),
        vocabulary: runner.vocabulary().snapshot(),
        counter: runner.model().counter(),
        prev_tokens: runner.prev_tokens(),
    };
    bincode::serialize_into(&mut writer, &header).context("serialize header")?;
    bincode::serialize_into(&mut writer, &record).context("serialize model")?;
    writer
        .flush()
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Load a runner of the given `order` from `path`.
///
/// A missing path (or `None`) yields a fresh runner. See
/// [`load_ngrams_with`] for the full contract.
pub fn load_ngrams(path: Option<&Path>, order: usize) -> Result<NGramRunner> {
    load_ngrams_with(path, Config::for_order(order))
}

/// Load a runner from `path`, falling back to `NGramRunner::new(config)`.
///
/// The fallback is taken when `path` is `None`, does not exist, or holds a
/// model of a different order than `config.order`. Everything else stored in
/// the file (lambda, caps) wins over `config`. I/O errors, foreign files and
/// unknown format versions are errors.
pub fn load_ngrams_with(path: Option<&Path>, config: Config) -> Result<NGramRunner> {
    let Some(path) = path.filter(|p| p.exists()) else {
        debug!(?path, "no stored n-gram model, starting fresh");
        return Ok(NGramRunner::new(config));
    };

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let header: Header = bincode::deserialize_from(&mut reader)
        .with_context(|| format!("read header of {}", path.display()))?;
    if header.magic != MAGIC {
        bail!("{} is not an n-gram model file", path.display());
    }
    if header.version != FORMAT_VERSION {
        bail!(
            "{} has format version {}, expected {}",
            path.display(),
            header.version,
            FORMAT_VERSION
        );
    }

    let record: RunnerRecord = bincode::deserialize_from(&mut reader)
        .with_context(|| format!("deserialize {}", path.display()))?;
    if record.config.order != config.order {
        warn!(
            path = %path.display(),
            stored = record.config.order,
            requested = config.order,
            "stored n-gram model has a different order, starting fresh"
        );
        return Ok(NGramRunner::new(config));
    }

    let runner = from_record(record).with_context(|| format!("restore {}", path.display()))?;
    debug!(path = %path.display(), vocabulary = runner.vocabulary().len(), "loaded n-gram model");
    Ok(runner)
}

fn from_record(record: RunnerRecord) -> Result<NGramRunner> {
    let RunnerRecord {
        config,
        vocabulary,
        counter,
        prev_tokens,
    } = record;

    ensure!(config.order >= 1, "n-gram order must be at least 1");
    ensure!(
        (0.0..=1.0).contains(&config.lambda),
        "lambda {} outside [0, 1]",
        config.lambda
    );
    ensure!(
        config.max_vocabulary_size >= config.order && config.max_sequence_length >= config.order,
        "vocabulary ({}) and sequence ({}) caps must be at least the order ({})",
        config.max_vocabulary_size,
        config.max_sequence_length,
        config.order
    );
    ensure!(
        prev_tokens.len() <= config.order,
        "{} context tokens stored for order {}",
        prev_tokens.len(),
        config.order
    );
    vocabulary
        .validate(config.max_vocabulary_size)
        .context("inconsistent vocabulary")?;

    let model = NGramModel::with_counter(config.order, config.lambda, counter);
    let vocabulary = VocabularyWithLimit::from_snapshot(
        config.max_vocabulary_size,
        config.max_sequence_length,
        config.renormalize_threshold,
        vocabulary,
    );
    Ok(NGramRunner::from_parts(
        config,
        model,
        vocabulary,
        VecDeque::from(prev_tokens),
    ))
}
