//! Secondary index structures.
//!
//! A [`PostingIndex`] maps a string key to the ordered set of insertion
//! sequence numbers carrying that key. Iterating a posting list therefore
//! yields insertion order for free, which is what keeps paged queries stable.

use std::collections::BTreeSet;
use std::ops::Bound;

use hashbrown::HashMap;

/// Insertion sequence number. Monotonic per table, never reused.
pub type Seq = u64;

/// Key → ordered set of sequence numbers.
#[derive(Debug, Clone, Default)]
pub struct PostingIndex {
    postings: HashMap<String, BTreeSet<Seq>>,
}

impl PostingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, seq: Seq) {
        self.postings.entry_ref(key).or_default().insert(seq);
    }

    /// Remove one posting; drops the key once its list is empty.
    pub fn remove(&mut self, key: &str, seq: Seq) -> bool {
        let Some(list) = self.postings.get_mut(key) else {
            return false;
        };
        let removed = list.remove(&seq);
        if list.is_empty() {
            self.postings.remove(key);
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<&BTreeSet<Seq>> {
        self.postings.get(key)
    }

    /// Number of postings under `key` (0 when absent).
    pub fn count(&self, key: &str) -> usize {
        self.postings.get(key).map_or(0, BTreeSet::len)
    }

    pub fn contains(&self, key: &str, seq: Seq) -> bool {
        self.postings.get(key).is_some_and(|l| l.contains(&seq))
    }

    /// First posting under `key` strictly after `after`.
    pub fn next_after(&self, key: &str, after: Option<Seq>) -> Option<Seq> {
        let list = self.postings.get(key)?;
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        list.range((lower, Bound::Unbounded)).next().copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.postings.keys().map(String::as_str)
    }

    pub fn key_count(&self) -> usize {
        self.postings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postings_stay_ordered() {
        let mut idx = PostingIndex::new();
        idx.insert("is_a", 7);
        idx.insert("is_a", 2);
        idx.insert("is_a", 5);
        let seqs: Vec<Seq> = idx.get("is_a").unwrap().iter().copied().collect();
        assert_eq!(seqs, vec![2, 5, 7]);
        assert_eq!(idx.next_after("is_a", None), Some(2));
        assert_eq!(idx.next_after("is_a", Some(2)), Some(5));
        assert_eq!(idx.next_after("is_a", Some(7)), None);
    }

    #[test]
    fn test_remove_drops_empty_keys() {
        let mut idx = PostingIndex::new();
        idx.insert("contains", 1);
        assert!(idx.remove("contains", 1));
        assert!(!idx.remove("contains", 1));
        assert_eq!(idx.key_count(), 0);
        assert_eq!(idx.count("contains"), 0);
    }
}
