//! ngram-core
//!
//! Incremental n-gram language model used to rerank code-completion
//! candidates. Tokens are learned one at a time into a bounded model:
//! the vocabulary is capped and evicts its least recently learned tokens,
//! and a bounded window of recent tokens lets old n-grams be forgotten.
//!
//! Public API:
//! - `NGramRunner` - Online learning entry point and scorer factory
//! - `NGramScorer` - Ranks candidate next tokens for a fixed context
//! - `VocabularyWithLimit` - Bounded token vocabulary with recency eviction
//! - `NGramModel` - Counted n-gram statistics with Jelinek–Mercer smoothing
//! - `save_ngrams` / `load_ngrams` - Versioned binary persistence
//! - `Config` - Model shape and smoothing parameters
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod trie;
pub use trie::TrieCounter;

pub mod ngram;
pub use ngram::NGramModel;

pub mod sequence;
pub use sequence::RecentTokensSequence;

pub mod recent;
pub use recent::RecentTokens;

pub mod vocabulary;
pub use vocabulary::{VocabularyWithLimit, UNKNOWN_INDEX, UNKNOWN_TOKEN};

pub mod runner;
pub use runner::{ModelStats, NGramRunner, NGramScorer};

pub mod persistence;
pub use persistence::{load_ngrams, load_ngrams_with, save_ngrams, FORMAT_VERSION};

/// Model shape and smoothing parameters.
///
/// Loaded from TOML (via `serde`); missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of tokens in an n-gram (context length + 1).
    pub order: usize,

    /// Jelinek–Mercer weight of the longer context against its backoff.
    /// Must lie in [0, 1].
    pub lambda: f64,

    /// Maximum number of live tokens in the vocabulary.
    /// Must be at least `order`.
    pub max_vocabulary_size: usize,

    /// Maximum number of recent tokens kept for forgetting.
    /// Must be at least `order`.
    pub max_sequence_length: usize,

    /// Recency counter value at which last-seen indices are shifted down.
    pub renormalize_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order: 4,
            lambda: 0.5,
            max_vocabulary_size: 3000,
            max_sequence_length: 10_000,
            renormalize_threshold: 1 << 30,
        }
    }
}

impl Config {
    /// Defaults with the given n-gram order.
    pub fn for_order(order: usize) -> Self {
        Self {
            order,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parse config {}", path.display()))
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("write config {}", path.display()))
    }

    /// Load configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize configuration to TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
