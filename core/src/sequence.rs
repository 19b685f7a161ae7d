//! Bounded circular buffer of recently learned vocabulary indices.
use crate::ngram::NGramModel;
use tracing::debug;

/// Backing size allocated on the first append.
const INITIAL_CAPACITY: usize = 16;

/// The most recent learned indices, oldest first, used to un-learn n-grams
/// once they fall out of the window.
///
/// The logical contents are `len` elements starting at `start` in a circular
/// backing store. The store doubles on demand up to `max_sequence_length`
/// instead of being allocated at full size.
///
/// Every element dropped from the head takes its counted windows with it:
/// the full `order`-sized window starting at the element and, while the
/// buffer still holds the first token ever learned, the shorter windows the
/// stream began with.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentTokensSequence {
    max_sequence_length: usize,
    sequence: Vec<u32>,
    start: usize,
    len: usize,
    holds_stream_start: bool,
}

impl RecentTokensSequence {
    /// # Panics
    /// If `max_sequence_length` is zero.
    pub fn new(max_sequence_length: usize) -> Self {
        assert!(
            max_sequence_length >= 1,
            "max sequence length must be at least 1"
        );
        Self {
            max_sequence_length,
            sequence: Vec::new(),
            start: 0,
            len: 0,
            holds_stream_start: true,
        }
    }

    /// Rebuild from persisted contents, oldest first. Only the most recent
    /// `max_sequence_length` elements are kept.
    pub(crate) fn restore(
        max_sequence_length: usize,
        mut elements: Vec<u32>,
        holds_stream_start: bool,
    ) -> Self {
        let mut restored = Self::new(max_sequence_length);
        let excess = elements.len().saturating_sub(max_sequence_length);
        elements.drain(..excess);
        restored.len = elements.len();
        restored.sequence = elements;
        restored.holds_stream_start = holds_stream_start && excess == 0;
        restored
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn max_sequence_length(&self) -> usize {
        self.max_sequence_length
    }

    /// Size of the backing store currently allocated.
    pub fn capacity(&self) -> usize {
        self.sequence.len()
    }

    pub(crate) fn holds_stream_start(&self) -> bool {
        self.holds_stream_start
    }

    /// Append `element`, forgetting the oldest one first when full.
    pub fn add_with_limit(&mut self, model: &mut NGramModel, element: u32) {
        if self.len >= self.max_sequence_length {
            self.forget(model, 1);
        }
        if self.len == self.sequence.len() {
            self.grow();
        }
        let tail = (self.start + self.len) % self.sequence.len();
        self.sequence[tail] = element;
        self.len += 1;
    }

    /// Forget everything except the most recent `keep` elements.
    pub fn forget_until(&mut self, model: &mut NGramModel, keep: usize) {
        let keep = keep.min(self.max_sequence_length);
        if self.len > keep {
            let forget_count = self.len - keep;
            debug!(forget_count, keep, "fast-forwarding recent token window");
            self.forget(model, forget_count);
        }
    }

    /// The first `new_length` logical elements, oldest first.
    pub fn sub_list_from_start(&self, new_length: usize) -> Vec<u32> {
        let n = new_length.min(self.len);
        (0..n)
            .map(|i| self.sequence[(self.start + i) % self.sequence.len()])
            .collect()
    }

    fn forget(&mut self, model: &mut NGramModel, forget_count: usize) {
        let forget_count = forget_count.min(self.len);
        if forget_count == 0 {
            return;
        }
        let order = model.order();
        let prefix = self.sub_list_from_start(forget_count + order - 1);

        let mut windows: Vec<&[u32]> = Vec::with_capacity(forget_count + order);
        if self.holds_stream_start {
            windows.extend((1..order.min(prefix.len() + 1)).map(|end| &prefix[..end]));
        }
        windows.extend(
            (0..forget_count)
                .filter(|&i| i + order <= prefix.len())
                .map(|i| &prefix[i..i + order]),
        );
        model.forget_windows(windows);

        self.start = (self.start + forget_count) % self.sequence.len();
        self.len -= forget_count;
        self.holds_stream_start = false;
    }

    fn grow(&mut self) {
        let doubled = match self.sequence.len() {
            0 => INITIAL_CAPACITY,
            n => n * 2,
        };
        let new_size = doubled.min(self.max_sequence_length);
        let mut grown = self.sub_list_from_start(self.len);
        grown.resize(new_size, 0);
        self.sequence = grown;
        self.start = 0;
    }
}
