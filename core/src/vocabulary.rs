//! Bounded token vocabulary with recency-based eviction.
//!
//! Responsibilities implemented here:
//! - `VocabularyWithLimit`: token → index mapping capped at
//!   `max_vocabulary_size` live tokens.
//! - Eviction of the least recently learned tokens, coordinated with the
//!   [`RecentTokensSequence`] so the n-gram statistics those tokens took part
//!   in are forgotten with them.
//! - `IndexGenerator`: per-instance monotonic counters, so independent
//!   vocabularies never share index spaces.
use crate::ngram::NGramModel;
use crate::recent::RecentTokens;
use crate::sequence::RecentTokensSequence;
use ahash::AHashMap;
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, Level};

/// Reserved token standing in for anything outside the vocabulary.
pub const UNKNOWN_TOKEN: &str = "<unk>";

/// Index of [`UNKNOWN_TOKEN`]. Never assigned to a real token.
pub const UNKNOWN_INDEX: u32 = 0;

/// Monotonic sequence of indices owned by one vocabulary.
///
/// `u32::MAX` itself is never handed out; once reached the generator is
/// exhausted and `next` returns `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexGenerator {
    next: u32,
}

impl IndexGenerator {
    pub(crate) fn starting_at(next: u32) -> Self {
        Self { next }
    }

    pub(crate) fn next(&mut self) -> Option<u32> {
        let index = self.next;
        self.next = index.checked_add(1)?;
        Some(index)
    }

    pub(crate) fn peek(&self) -> u32 {
        self.next
    }
}

/// Persisted form of a [`VocabularyWithLimit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct VocabularySnapshot {
    pub next_word_index: u32,
    pub recent_next_index: u32,
    pub recent: Vec<(String, u32)>,
    pub sequence: Vec<u32>,
    pub sequence_holds_stream_start: bool,
    pub word_indices: Vec<(String, u32)>,
}

impl VocabularySnapshot {
    /// Check the cross-references a restored vocabulary relies on.
    pub(crate) fn validate(&self, max_vocabulary_size: usize) -> Result<()> {
        ensure!(
            self.word_indices.len() <= max_vocabulary_size,
            "{} live tokens stored for a vocabulary of {}",
            self.word_indices.len(),
            max_vocabulary_size
        );

        let mut live: AHashMap<&str, u32> = AHashMap::with_capacity(self.word_indices.len());
        for (token, index) in &self.word_indices {
            ensure!(
                *index != UNKNOWN_INDEX && *index < self.next_word_index,
                "token {token:?} has index {index}, expected 1..{}",
                self.next_word_index
            );
            ensure!(
                live.insert(token.as_str(), *index).is_none(),
                "token {token:?} is stored twice"
            );
        }

        ensure!(
            self.recent.len() == live.len(),
            "recency record holds {} tokens, vocabulary {}",
            self.recent.len(),
            live.len()
        );
        for (token, last_seen) in &self.recent {
            ensure!(
                live.contains_key(token.as_str()),
                "recency record holds unknown token {token:?}"
            );
            ensure!(
                *last_seen < self.recent_next_index,
                "token {token:?} last seen at {last_seen}, next index is {}",
                self.recent_next_index
            );
        }
        Ok(())
    }
}

/// Token vocabulary holding at most `max_vocabulary_size` live tokens.
///
/// Indices start at 1 and are never reused, even after eviction. Every live
/// token is also present in the recency record; when a new token would push
/// the vocabulary past its cap, the least recently learned tokens are
/// evicted and the recent-token window is fast-forwarded past their last
/// appearance, forgetting every n-gram counted in that stretch.
#[derive(Debug)]
pub struct VocabularyWithLimit {
    max_vocabulary_size: usize,
    renormalize_threshold: u32,
    word_indices: AHashMap<String, u32>,
    word_index_generator: IndexGenerator,
    recent: RecentTokens,
    recent_sequence: RecentTokensSequence,
}

impl VocabularyWithLimit {
    /// # Panics
    /// If `max_vocabulary_size` or `max_sequence_length` is zero.
    pub fn new(
        max_vocabulary_size: usize,
        max_sequence_length: usize,
        renormalize_threshold: u32,
    ) -> Self {
        assert!(
            max_vocabulary_size >= 1,
            "max vocabulary size must be at least 1"
        );
        Self {
            max_vocabulary_size,
            renormalize_threshold,
            word_indices: AHashMap::new(),
            word_index_generator: IndexGenerator::starting_at(UNKNOWN_INDEX + 1),
            recent: RecentTokens::new(),
            recent_sequence: RecentTokensSequence::new(max_sequence_length),
        }
    }

    pub(crate) fn from_snapshot(
        max_vocabulary_size: usize,
        max_sequence_length: usize,
        renormalize_threshold: u32,
        snapshot: VocabularySnapshot,
    ) -> Self {
        let mut vocabulary = Self::new(
            max_vocabulary_size,
            max_sequence_length,
            renormalize_threshold,
        );
        vocabulary.word_indices = snapshot.word_indices.into_iter().collect();
        vocabulary.word_index_generator = IndexGenerator::starting_at(snapshot.next_word_index);
        vocabulary.recent = RecentTokens::restore(snapshot.recent, snapshot.recent_next_index);
        vocabulary.recent_sequence = RecentTokensSequence::restore(
            max_sequence_length,
            snapshot.sequence,
            snapshot.sequence_holds_stream_start,
        );
        vocabulary
    }

    pub(crate) fn snapshot(&self) -> VocabularySnapshot {
        let mut word_indices: Vec<(String, u32)> = self
            .word_indices
            .iter()
            .map(|(token, &index)| (token.clone(), index))
            .collect();
        word_indices.sort_by_key(|&(_, index)| index);
        VocabularySnapshot {
            next_word_index: self.word_index_generator.peek(),
            recent_next_index: self.recent.next_index(),
            recent: self.recent.entries(),
            sequence: self.recent_sequence.sub_list_from_start(self.recent_sequence.len()),
            sequence_holds_stream_start: self.recent_sequence.holds_stream_start(),
            word_indices,
        }
    }

    pub fn max_vocabulary_size(&self) -> usize {
        self.max_vocabulary_size
    }

    pub fn renormalize_threshold(&self) -> u32 {
        self.renormalize_threshold
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.word_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word_indices.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.word_indices.contains_key(token)
    }

    pub fn index_of(&self, token: &str) -> Option<u32> {
        self.word_indices.get(token).copied()
    }

    pub fn recent_tokens(&self) -> &RecentTokens {
        &self.recent
    }

    pub fn recent_sequence(&self) -> &RecentTokensSequence {
        &self.recent_sequence
    }

    /// Map tokens to their current indices without touching the vocabulary.
    /// Unknown tokens map to [`UNKNOWN_INDEX`].
    pub fn to_existing_indices<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<u32> {
        tokens
            .iter()
            .map(|token| self.index_of(token.as_ref()).unwrap_or(UNKNOWN_INDEX))
            .collect()
    }

    /// Map a context window whose last token is the one being learned.
    ///
    /// Only the last token may enter the vocabulary; it becomes the most
    /// recent token and is appended to the recent-token window. The window
    /// is expected to be built one token at a time, so every earlier token
    /// is already live. Earlier tokens that are not map to
    /// [`UNKNOWN_INDEX`]; with debug logging enabled they are also reported.
    /// Once word indices are exhausted, new tokens are learned as unknown.
    pub fn to_indices_with_limit<S: AsRef<str>>(
        &mut self,
        tokens: &[S],
        model: &mut NGramModel,
    ) -> Vec<u32> {
        let Some((last, context)) = tokens.split_last() else {
            return Vec::new();
        };

        if tracing::enabled!(Level::DEBUG) {
            for token in context {
                if !self.recent.contains(token.as_ref()) {
                    error!(
                        token = token.as_ref(),
                        "assertion failed: context token is not in the recency record"
                    );
                }
            }
        }

        let mut indices = self.to_existing_indices(context);
        let last = last.as_ref();
        let index = self.to_index_with_limit(last, model);
        if index != UNKNOWN_INDEX {
            self.recent.update(last);
        }
        self.recent_sequence.add_with_limit(model, index);
        self.renormalize_if_needed();
        indices.push(index);
        indices
    }

    fn to_index_with_limit(&mut self, token: &str, model: &mut NGramModel) -> u32 {
        if let Some(index) = self.index_of(token) {
            return index;
        }
        if self.recent.len() >= self.max_vocabulary_size {
            if let Some(latest) = self.trim_recent_tokens_size() {
                // Everything up to and including `latest` is stale.
                let keep = self
                    .recent
                    .next_index()
                    .saturating_sub(1)
                    .saturating_sub(latest);
                self.recent_sequence.forget_until(model, keep as usize);
            }
        }
        let Some(index) = self.word_index_generator.next() else {
            error!(token, "word indices exhausted, learning token as unknown");
            return UNKNOWN_INDEX;
        };
        self.word_indices.insert(token.to_owned(), index);
        index
    }

    /// Evict eldest tokens until there is room for one more. Returns the
    /// latest last-seen index among the evicted tokens.
    fn trim_recent_tokens_size(&mut self) -> Option<u32> {
        let mut latest_appearance: Option<u32> = None;
        let mut evicted = 0usize;
        while self.recent.len() >= self.max_vocabulary_size {
            let Some((token, last_index)) = self.recent.remove_eldest() else {
                break;
            };
            self.word_indices.remove(&token);
            latest_appearance = Some(latest_appearance.map_or(last_index, |l| l.max(last_index)));
            evicted += 1;
        }
        debug!(evicted, ?latest_appearance, "evicted least recently learned tokens");
        latest_appearance
    }

    fn renormalize_if_needed(&mut self) {
        let next = self.recent.next_index();
        // The recency counter must never run out, whatever the threshold.
        if next < self.renormalize_threshold.min(u32::MAX - 1) {
            return;
        }
        let window = u32::try_from(self.recent_sequence.max_sequence_length()).unwrap_or(u32::MAX);
        let floor = next.saturating_sub(window.saturating_add(1));
        if floor > 0 {
            debug!(floor, "renormalizing recency indices");
            self.recent.renormalize(floor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(vocabulary: &mut VocabularyWithLimit, model: &mut NGramModel, tokens: &[&str]) {
        for token in tokens {
            vocabulary.to_indices_with_limit(&[*token], model);
        }
    }

    #[test]
    fn indices_start_at_one_and_are_stable() {
        let mut model = NGramModel::new(1, 0.5);
        let mut vocabulary = VocabularyWithLimit::new(10, 100, u32::MAX);
        feed(&mut vocabulary, &mut model, &["a", "b", "a"]);

        assert_eq!(vocabulary.index_of("a"), Some(1));
        assert_eq!(vocabulary.index_of("b"), Some(2));
        assert_eq!(vocabulary.len(), 2);
        assert_eq!(vocabulary.recent_sequence().sub_list_from_start(3), vec![1, 2, 1]);
        assert_eq!(
            vocabulary.to_existing_indices(&["b", "zzz", "a"]),
            vec![2, UNKNOWN_INDEX, 1]
        );
    }

    #[test]
    fn evicts_least_recently_learned_tokens() {
        let mut model = NGramModel::new(1, 0.5);
        let mut vocabulary = VocabularyWithLimit::new(3, 100, u32::MAX);
        feed(&mut vocabulary, &mut model, &["a", "b", "c", "a", "d"]);

        assert_eq!(vocabulary.len(), 3);
        assert!(!vocabulary.contains("b"));
        assert!(vocabulary.contains("a"));
        assert!(vocabulary.contains("c"));
        // Indices are not reused after eviction.
        assert_eq!(vocabulary.index_of("d"), Some(4));
        // Positions up to b's last appearance are gone from the window.
        assert_eq!(vocabulary.recent_sequence().sub_list_from_start(10), vec![3, 1, 4]);
    }

    #[test]
    fn vocabulary_never_exceeds_limit() {
        let mut model = NGramModel::new(2, 0.5);
        let mut vocabulary = VocabularyWithLimit::new(4, 50, u32::MAX);
        for i in 0..500 {
            let token = format!("tok{}", (i * 7) % 13);
            vocabulary.to_indices_with_limit(&[token.as_str()], &mut model);
            assert!(vocabulary.len() <= 4);
            assert!(vocabulary.recent_tokens().len() <= 4);
            assert!(vocabulary.recent_sequence().len() <= 50);
        }
    }

    #[test]
    fn missing_context_tokens_map_to_unknown() {
        let mut model = NGramModel::new(3, 0.5);
        let mut vocabulary = VocabularyWithLimit::new(10, 100, u32::MAX);
        let indices = vocabulary.to_indices_with_limit(&["never", "seen", "x"], &mut model);

        assert_eq!(indices, vec![UNKNOWN_INDEX, UNKNOWN_INDEX, 1]);
        assert_eq!(vocabulary.len(), 1);
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn map_with_unseen_context(max_level: Level) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(max_level)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut model = NGramModel::new(2, 0.5);
            let mut vocabulary = VocabularyWithLimit::new(10, 100, u32::MAX);
            let indices = vocabulary.to_indices_with_limit(&["ghost", "x"], &mut model);
            assert_eq!(indices, vec![UNKNOWN_INDEX, 1]);
            assert!(!vocabulary.contains("ghost"));
        });
        logs.text()
    }

    #[test]
    fn unseen_context_is_reported_when_debugging() {
        let output = map_with_unseen_context(Level::DEBUG);
        assert!(output.contains("ERROR"), "{output}");
        assert!(output.contains("context token is not in the recency record"));
        assert!(output.contains("ghost"));
    }

    #[test]
    fn unseen_context_is_silent_above_debug() {
        let output = map_with_unseen_context(Level::INFO);
        assert!(output.is_empty(), "{output}");
    }

    #[test]
    fn index_generator_stops_before_overflow() {
        let mut generator = IndexGenerator::starting_at(u32::MAX - 1);
        assert_eq!(generator.next(), Some(u32::MAX - 1));
        assert_eq!(generator.next(), None);
        assert_eq!(generator.next(), None);
        assert_eq!(generator.peek(), u32::MAX);
    }

    #[test]
    fn exhausted_word_indices_learn_as_unknown() {
        let mut model = NGramModel::new(2, 0.5);
        let mut vocabulary = VocabularyWithLimit::new(10, 100, u32::MAX);
        feed(&mut vocabulary, &mut model, &["a"]);
        vocabulary.word_index_generator = IndexGenerator::starting_at(u32::MAX);

        let indices = vocabulary.to_indices_with_limit(&["a", "b"], &mut model);
        assert_eq!(indices, vec![1, UNKNOWN_INDEX]);
        assert!(!vocabulary.contains("b"));
        assert!(!vocabulary.recent_tokens().contains("b"));
        assert_eq!(vocabulary.recent_sequence().sub_list_from_start(2), vec![1, UNKNOWN_INDEX]);
        assert!(vocabulary.snapshot().validate(10).is_ok());
    }

    #[test]
    fn recency_counter_renormalizes_near_its_limit() {
        let mut model = NGramModel::new(1, 0.5);
        let mut vocabulary = VocabularyWithLimit::new(10, 4, u32::MAX);
        vocabulary.recent = RecentTokens::restore(Vec::new(), u32::MAX - 2);
        feed(&mut vocabulary, &mut model, &["a", "b"]);

        // "a" took the counter to u32::MAX - 1, shifted down by next - 5.
        assert_eq!(vocabulary.recent_tokens().next_index(), 6);
        assert_eq!(vocabulary.recent_tokens().last_index("a"), Some(4));
        assert_eq!(vocabulary.recent_tokens().last_index("b"), Some(5));
    }

    #[test]
    fn snapshot_validation_rejects_inconsistent_state() {
        let mut model = NGramModel::new(2, 0.5);
        let mut vocabulary = VocabularyWithLimit::new(3, 8, u32::MAX);
        feed(&mut vocabulary, &mut model, &["a", "b", "c"]);
        let snapshot = vocabulary.snapshot();
        assert!(snapshot.validate(3).is_ok());
        assert!(snapshot.validate(2).is_err());

        let mut stale_counter = snapshot.clone();
        stale_counter.recent_next_index = 0;
        assert!(stale_counter.validate(3).is_err());

        let mut unknown_index = snapshot.clone();
        unknown_index.word_indices[0].1 = UNKNOWN_INDEX;
        assert!(unknown_index.validate(3).is_err());

        let mut future_index = snapshot.clone();
        future_index.next_word_index = 2;
        assert!(future_index.validate(3).is_err());

        let mut orphan = snapshot.clone();
        orphan.recent[0].0 = "zzz".to_string();
        assert!(orphan.validate(3).is_err());

        let mut missing = snapshot;
        missing.recent.pop();
        assert!(missing.validate(3).is_err());
    }

    #[test]
    fn renormalizes_once_threshold_is_reached() {
        let mut model = NGramModel::new(1, 0.5);
        let mut vocabulary = VocabularyWithLimit::new(100, 4, 20);
        for i in 0..20 {
            let token = format!("t{}", i % 3);
            vocabulary.to_indices_with_limit(&[token.as_str()], &mut model);
        }

        // 20 reached the threshold; floor = 20 - 5 = 15.
        assert_eq!(vocabulary.recent_tokens().next_index(), 5);
        assert_eq!(vocabulary.recent_tokens().last_index("t1"), Some(4));
        assert_eq!(vocabulary.recent_tokens().last_index("t0"), Some(3));
        assert_eq!(vocabulary.recent_tokens().last_index("t2"), Some(2));
    }

    #[test]
    fn snapshot_restores_equivalent_vocabulary() {
        let mut model = NGramModel::new(2, 0.5);
        let mut vocabulary = VocabularyWithLimit::new(3, 8, u32::MAX);
        feed(&mut vocabulary, &mut model, &["a", "b", "c", "d", "b", "e"]);

        let snapshot = vocabulary.snapshot();
        let restored = VocabularyWithLimit::from_snapshot(3, 8, u32::MAX, snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.len(), vocabulary.len());
        assert_eq!(restored.index_of("e"), vocabulary.index_of("e"));
    }
}
