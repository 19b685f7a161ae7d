//! Recency record: which tokens were learned most recently, and when.
use crate::vocabulary::IndexGenerator;
use lru::LruCache;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Token → last-seen index, ordered from least to most recently learned.
///
/// The "last-seen index" is a sequence number handed out by [`update`]
/// (one per learned token), not a timestamp. Each accessor locks the record
/// on its own; a sequence of calls is not atomic.
///
/// [`update`]: RecentTokens::update
#[derive(Debug)]
pub struct RecentTokens {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    tokens: LruCache<String, u32>,
    sequence: IndexGenerator,
}

impl Default for RecentTokens {
    fn default() -> Self {
        Self::new()
    }
}

impl RecentTokens {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tokens: LruCache::unbounded(),
                sequence: IndexGenerator::starting_at(0),
            }),
        }
    }

    /// Rebuild from eldest-first entries and the next index to hand out.
    pub(crate) fn restore(entries: Vec<(String, u32)>, next_index: u32) -> Self {
        let mut tokens = LruCache::unbounded();
        for (token, index) in entries {
            tokens.put(token, index);
        }
        Self {
            inner: Mutex::new(Inner {
                tokens,
                sequence: IndexGenerator::starting_at(next_index),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `token` as the most recently learned one and return its new
    /// last-seen index.
    ///
    /// Indices saturate at `u32::MAX`; [`renormalize`](Self::renormalize)
    /// keeps them well below that.
    pub fn update(&self, token: &str) -> u32 {
        let mut inner = self.lock();
        let index = inner.sequence.next().unwrap_or(u32::MAX);
        inner.tokens.put(token.to_owned(), index);
        index
    }

    /// Remove and return the least recently learned token.
    pub fn remove_eldest(&self) -> Option<(String, u32)> {
        self.lock().tokens.pop_lru()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.lock().tokens.contains(token)
    }

    pub fn last_index(&self, token: &str) -> Option<u32> {
        self.lock().tokens.peek(token).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tokens.is_empty()
    }

    /// The index the next [`update`](Self::update) will hand out.
    pub fn next_index(&self) -> u32 {
        self.lock().sequence.peek()
    }

    /// Shift every index (and the counter) down by `floor`, clamping at 0.
    pub fn renormalize(&self, floor: u32) {
        let mut inner = self.lock();
        for (_, index) in inner.tokens.iter_mut() {
            *index = index.saturating_sub(floor);
        }
        let next = inner.sequence.peek().saturating_sub(floor);
        inner.sequence = IndexGenerator::starting_at(next);
    }

    /// Eldest-first copy of the record.
    pub fn entries(&self) -> Vec<(String, u32)> {
        self.lock()
            .tokens
            .iter()
            .rev()
            .map(|(token, index)| (token.clone(), *index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_moves_token_to_most_recent() {
        let recent = RecentTokens::new();
        assert_eq!(recent.update("a"), 0);
        assert_eq!(recent.update("b"), 1);
        assert_eq!(recent.update("a"), 2);

        assert_eq!(recent.len(), 2);
        assert_eq!(recent.last_index("a"), Some(2));
        assert_eq!(recent.next_index(), 3);
        assert_eq!(recent.remove_eldest(), Some(("b".to_string(), 1)));
        assert_eq!(recent.remove_eldest(), Some(("a".to_string(), 2)));
        assert_eq!(recent.remove_eldest(), None);
        assert!(recent.is_empty());
    }

    #[test]
    fn renormalize_preserves_order_and_clamps() {
        let recent = RecentTokens::new();
        for token in ["x", "y", "z", "w"] {
            recent.update(token);
        }
        recent.renormalize(2);

        assert_eq!(
            recent.entries(),
            vec![
                ("x".to_string(), 0),
                ("y".to_string(), 0),
                ("z".to_string(), 0),
                ("w".to_string(), 1),
            ]
        );
        assert_eq!(recent.next_index(), 2);
        assert_eq!(recent.update("x"), 2);
    }

    #[test]
    fn update_saturates_at_the_last_index() {
        let recent = RecentTokens::restore(Vec::new(), u32::MAX - 1);
        assert_eq!(recent.update("a"), u32::MAX - 1);
        assert_eq!(recent.update("b"), u32::MAX);
        assert_eq!(recent.update("a"), u32::MAX);
        assert_eq!(recent.remove_eldest(), Some(("b".to_string(), u32::MAX)));
    }

    #[test]
    fn restore_round_trips_entries() {
        let recent = RecentTokens::new();
        recent.update("one");
        recent.update("two");
        recent.update("one");

        let restored = RecentTokens::restore(recent.entries(), recent.next_index());
        assert_eq!(restored.entries(), recent.entries());
        assert_eq!(restored.next_index(), 3);
        assert!(restored.contains("two"));
        assert!(!restored.contains("three"));
    }

    #[test]
    fn shared_between_threads() {
        let recent = std::sync::Arc::new(RecentTokens::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let recent = recent.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        recent.update(&format!("t{t}-{i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert_eq!(recent.len(), 400);
        assert_eq!(recent.next_index(), 400);
    }
}
