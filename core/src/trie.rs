//! Prefix trie counting sequences of vocabulary indices.
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// A prefix trie over vocabulary indices.
///
/// Counting a sequence increments every node on its path (the root
/// included), so the count stored at a node is the number of counted
/// sequences starting with that node's prefix. Counts are signed: an
/// `uncount` issued before the matching `count` may dip a node below zero,
/// and the pair still nets out exactly. Reads clamp at zero.
///
/// # Example
/// ```
/// use ngram_core::trie::TrieCounter;
///
/// let mut trie = TrieCounter::new();
/// trie.count(&[1, 2, 3]);
/// trie.count(&[1, 2]);
///
/// assert_eq!(trie.count_of(&[1]), 2);
/// assert_eq!(trie.count_of(&[1, 2, 3]), 1);
/// assert_eq!(trie.count_of(&[2]), 0);
/// ```
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrieCounter {
    root: TrieNode,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct TrieNode {
    count: i64,
    children: AHashMap<u32, TrieNode>,
}

impl TrieNode {
    /// A node carrying no information can be dropped from its parent.
    fn is_vacant(&self) -> bool {
        self.count == 0 && self.children.is_empty()
    }
}

impl TrieCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `seq`. Empty sequences are ignored.
    pub fn count(&mut self, seq: &[u32]) {
        if !seq.is_empty() {
            Self::update(&mut self.root, seq, 1);
        }
    }

    /// Remove one occurrence of `seq`. Empty sequences are ignored.
    pub fn uncount(&mut self, seq: &[u32]) {
        if !seq.is_empty() {
            Self::update(&mut self.root, seq, -1);
        }
    }

    pub fn count_batch<'a, I>(&mut self, seqs: I)
    where
        I: IntoIterator<Item = &'a [u32]>,
    {
        for seq in seqs {
            self.count(seq);
        }
    }

    pub fn uncount_batch<'a, I>(&mut self, seqs: I)
    where
        I: IntoIterator<Item = &'a [u32]>,
    {
        for seq in seqs {
            self.uncount(seq);
        }
    }

    fn update(node: &mut TrieNode, seq: &[u32], delta: i64) {
        node.count += delta;
        if let Some((&first, rest)) = seq.split_first() {
            let child = node.children.entry(first).or_default();
            Self::update(child, rest, delta);
            if child.is_vacant() {
                node.children.remove(&first);
            }
        }
    }

    fn find(&self, seq: &[u32]) -> Option<&TrieNode> {
        let mut node = &self.root;
        for token in seq {
            node = node.children.get(token)?;
        }
        Some(node)
    }

    /// Number of counted sequences starting with `seq`.
    ///
    /// `count_of(&[])` is the total number of counted sequences.
    pub fn count_of(&self, seq: &[u32]) -> u64 {
        self.find(seq).map_or(0, |node| node.count.max(0) as u64)
    }

    /// Number of distinct tokens observed right after `seq`.
    pub fn distinct_successors(&self, seq: &[u32]) -> usize {
        self.find(seq).map_or(0, |node| {
            node.children.values().filter(|child| child.count > 0).count()
        })
    }

    /// Total number of nodes below the root.
    pub fn node_count(&self) -> usize {
        fn walk(node: &TrieNode) -> usize {
            node.children.values().map(|child| 1 + walk(child)).sum()
        }
        walk(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_vacant()
    }
}
