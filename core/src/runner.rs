//! Online learning entry point and scorer factory.
use crate::ngram::NGramModel;
use crate::vocabulary::VocabularyWithLimit;
use crate::Config;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::trace;

/// Incremental n-gram model fed one token at a time.
///
/// `prev_tokens` holds the last `order` learned tokens. Each new token slides
/// that window, the window is mapped through the bounded vocabulary, and the
/// n-gram ending at the new token is counted. Scorers borrow the runner, so
/// learning cannot interleave with an in-flight ranking.
#[derive(Debug)]
pub struct NGramRunner {
    config: Config,
    model: NGramModel,
    vocabulary: VocabularyWithLimit,
    prev_tokens: VecDeque<String>,
}

/// Summary of a runner's state, for diagnostics and tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStats {
    pub order: usize,
    pub lambda: f64,
    pub vocabulary_size: usize,
    pub max_vocabulary_size: usize,
    pub recent_tokens: usize,
    pub max_sequence_length: usize,
    pub counted_windows: u64,
    pub trie_nodes: usize,
    pub prev_tokens: Vec<String>,
}

impl NGramRunner {
    /// Create an empty runner.
    ///
    /// # Panics
    /// If the vocabulary or the recent-token window is smaller than the
    /// n-gram order, or `lambda` lies outside `[0, 1]`.
    pub fn new(config: Config) -> Self {
        let model = NGramModel::new(config.order, config.lambda);
        let vocabulary = VocabularyWithLimit::new(
            config.max_vocabulary_size,
            config.max_sequence_length,
            config.renormalize_threshold,
        );
        Self::from_parts(config, model, vocabulary, VecDeque::new())
    }

    /// Empty runner with default parameters for `order`.
    pub fn create_new_model_runner(order: usize) -> Self {
        Self::new(Config::for_order(order))
    }

    pub(crate) fn from_parts(
        config: Config,
        model: NGramModel,
        vocabulary: VocabularyWithLimit,
        prev_tokens: VecDeque<String>,
    ) -> Self {
        assert!(
            config.max_vocabulary_size >= config.order,
            "max vocabulary size ({}) must be at least the n-gram order ({})",
            config.max_vocabulary_size,
            config.order
        );
        assert!(
            config.max_sequence_length >= config.order,
            "max sequence length ({}) must be at least the n-gram order ({})",
            config.max_sequence_length,
            config.order
        );
        Self {
            config,
            model,
            vocabulary,
            prev_tokens,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn order(&self) -> usize {
        self.model.order()
    }

    pub fn lambda(&self) -> f64 {
        self.model.lambda()
    }

    pub fn model(&self) -> &NGramModel {
        &self.model
    }

    pub fn vocabulary(&self) -> &VocabularyWithLimit {
        &self.vocabulary
    }

    /// The last `order` learned tokens, oldest first.
    pub fn prev_tokens(&self) -> Vec<String> {
        self.prev_tokens.iter().cloned().collect()
    }

    /// Learn the next token of the stream. Empty tokens are ignored.
    pub fn learn_next_token(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        if self.prev_tokens.len() == self.model.order() {
            self.prev_tokens.pop_front();
        }
        self.prev_tokens.push_back(token.to_owned());

        let window: &[String] = self.prev_tokens.make_contiguous();
        let indices = self
            .vocabulary
            .to_indices_with_limit(window, &mut self.model);
        if indices.len() > 1 {
            // Un-count the shorter window so that only the newly completed
            // n-gram is added.
            self.model.forget(&indices[..indices.len() - 1]);
        }
        self.model.learn(&indices);
        trace!(token, ?indices, "learned token");
    }

    /// Scorer for the token following the current context.
    pub fn create_scorer(&self) -> NGramScorer<'_> {
        let context_len = self.model.order() - 1;
        let skip = self.prev_tokens.len().saturating_sub(context_len);
        NGramScorer {
            model: &self.model,
            vocabulary: &self.vocabulary,
            prefix: self.prev_tokens.iter().skip(skip).cloned().collect(),
        }
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            order: self.order(),
            lambda: self.lambda(),
            vocabulary_size: self.vocabulary.len(),
            max_vocabulary_size: self.vocabulary.max_vocabulary_size(),
            recent_tokens: self.vocabulary.recent_sequence().len(),
            max_sequence_length: self.vocabulary.recent_sequence().max_sequence_length(),
            counted_windows: self.model.counter().count_of(&[]),
            trie_nodes: self.model.counter().node_count(),
            prev_tokens: self.prev_tokens(),
        }
    }
}

/// Scores candidate next tokens against a context captured at creation.
#[derive(Debug, Clone)]
pub struct NGramScorer<'a> {
    model: &'a NGramModel,
    vocabulary: &'a VocabularyWithLimit,
    prefix: Vec<String>,
}

impl NGramScorer<'_> {
    /// The captured context, oldest first.
    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }

    /// Smoothed probability of `candidate` following the captured context.
    /// Tokens outside the vocabulary are scored as the unknown token.
    pub fn score(&self, candidate: &str) -> f64 {
        let mut tokens: Vec<&str> = self.prefix.iter().map(String::as_str).collect();
        tokens.push(candidate);
        let indices = self.vocabulary.to_existing_indices(&tokens);
        self.model.model_token(&indices, indices.len() - 1)
    }

    /// Candidates paired with their scores, best first. Ties keep their
    /// input order.
    pub fn rank<I, S>(&self, candidates: I) -> Vec<(S, f64)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut scored: Vec<(S, f64)> = candidates
            .into_iter()
            .map(|candidate| {
                let score = self.score(candidate.as_ref());
                (candidate, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored
    }
}
