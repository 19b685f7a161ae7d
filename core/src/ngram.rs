//! N-gram statistical language model with Jelinek–Mercer interpolation.
use crate::trie::TrieCounter;
use serde::{Deserialize, Serialize};

/// Counted n-gram model over vocabulary indices.
///
/// Statistics live in a [`TrieCounter`]. Callers drive learning and
/// forgetting explicitly; the model never decides on its own what to drop.
///
/// Scoring interpolates the maximum-likelihood estimate of each context
/// length with the estimate of the next shorter one:
///
/// ```text
/// p_0   = 1 / (distinct first tokens + 1)
/// p_k+1 = lambda * c(ctx_k, w) / c(ctx_k) + (1 - lambda) * p_k
/// ```
///
/// Context lengths whose count is zero are skipped, so an unseen context
/// degrades gracefully to the shorter ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NGramModel {
    order: usize,
    lambda: f64,
    counter: TrieCounter,
}

impl NGramModel {
    /// Create an empty model.
    ///
    /// # Panics
    /// If `order` is zero or `lambda` lies outside `[0, 1]`.
    pub fn new(order: usize, lambda: f64) -> Self {
        Self::with_counter(order, lambda, TrieCounter::new())
    }

    pub(crate) fn with_counter(order: usize, lambda: f64, counter: TrieCounter) -> Self {
        assert!(order >= 1, "n-gram order must be at least 1");
        assert!(
            (0.0..=1.0).contains(&lambda),
            "lambda must lie in [0, 1], got {lambda}"
        );
        Self {
            order,
            lambda,
            counter,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn counter(&self) -> &TrieCounter {
        &self.counter
    }

    /// Start of the n-gram ending at `end` (inclusive).
    fn ngram_start(&self, end: usize) -> usize {
        (end + 1).saturating_sub(self.order)
    }

    /// Count, for every position, the n-gram ending there.
    pub fn learn(&mut self, indices: &[u32]) {
        for end in 0..indices.len() {
            let start = self.ngram_start(end);
            self.counter.count(&indices[start..=end]);
        }
    }

    /// Exact inverse of [`learn`](Self::learn) on the same slice.
    pub fn forget(&mut self, indices: &[u32]) {
        for end in 0..indices.len() {
            let start = self.ngram_start(end);
            self.counter.uncount(&indices[start..=end]);
        }
    }

    /// Uncount explicit windows, as built by the recent-token buffer.
    pub fn forget_windows<'a, I>(&mut self, windows: I)
    where
        I: IntoIterator<Item = &'a [u32]>,
    {
        self.counter.uncount_batch(windows);
    }

    /// Probability of `indices[position]` given up to `order - 1` preceding
    /// indices.
    ///
    /// The result lies in `[0, 1]`; it is strictly positive whenever
    /// `lambda < 1`.
    ///
    /// # Panics
    /// If `position` is out of bounds.
    pub fn model_token(&self, indices: &[u32], position: usize) -> f64 {
        let token = indices[position];
        let context = &indices[self.ngram_start(position)..position];

        let mut probability = 1.0 / (self.counter.distinct_successors(&[]) as f64 + 1.0);
        let mut sequence = Vec::with_capacity(context.len() + 1);
        for k in 0..=context.len() {
            let ctx = &context[context.len() - k..];
            let ctx_count = self.counter.count_of(ctx);
            if ctx_count == 0 {
                continue;
            }
            sequence.clear();
            sequence.extend_from_slice(ctx);
            sequence.push(token);
            let mle = self.counter.count_of(&sequence) as f64 / ctx_count as f64;
            probability = self.lambda * mle + (1.0 - self.lambda) * probability;
        }
        probability
    }
}
