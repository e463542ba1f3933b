//! N-gram blocking: bound pairwise scoring to plausibly similar pairs.
//!
//! Every node contributes the character n-grams of its normalized label and
//! aliases, plus the n-grams of their punctuation-free index keys so that
//! "CIA" and "C.I.A." land in the same bucket. Two nodes become a candidate
//! pair when they share at least one gram.

use std::collections::{BTreeSet, HashMap};

use crate::graph::Node;
use crate::normalize::{index_key, ngrams};

/// Buckets of node positions keyed by n-gram.
#[derive(Debug, Default)]
pub struct BlockingIndex {
    buckets: HashMap<String, Vec<usize>>,
    len: usize,
}

impl BlockingIndex {
    /// Bucket nodes by the n-grams of their names. Positions refer to the
    /// iteration order of `nodes`.
    pub fn build<'a>(nodes: impl IntoIterator<Item = &'a Node>, n: usize) -> Self {
        let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
        let mut len = 0;
        for (pos, node) in nodes.into_iter().enumerate() {
            len = pos + 1;
            let mut grams = std::collections::HashSet::new();
            for name in node.names() {
                grams.extend(ngrams(name, n));
                let key = index_key(name);
                if !key.is_empty() {
                    grams.extend(ngrams(&key, n));
                }
            }
            for gram in grams {
                buckets.entry(gram).or_default().push(pos);
            }
        }
        Self { buckets, len }
    }

    /// Number of nodes indexed.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every unordered pair `(i, j)` with `i < j` sharing a bucket.
    pub fn candidate_pairs(&self) -> BTreeSet<(usize, usize)> {
        let mut pairs = BTreeSet::new();
        for members in self.buckets.values() {
            for (k, &i) in members.iter().enumerate() {
                for &j in &members[k + 1..] {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_gram_makes_a_pair() {
        let nodes = [
            Node::new("Sidney Gottlieb", "person"),
            Node::new("Gottlieb", "person"),
            Node::new("CIA", "organization"),
        ];
        let index = BlockingIndex::build(nodes.iter(), 3);
        assert_eq!(index.len(), 3);
        let pairs = index.candidate_pairs();
        assert!(pairs.contains(&(0, 1)));
        assert!(!pairs.contains(&(0, 2)));
        assert!(!pairs.contains(&(1, 2)));
    }

    #[test]
    fn aliases_participate_in_blocking() {
        let nodes = [
            Node::new("CIA", "organization").with_aliases(["The Agency"]),
            Node::new("Agency", "organization"),
        ];
        let pairs = BlockingIndex::build(nodes.iter(), 3).candidate_pairs();
        assert_eq!(pairs.into_iter().collect::<Vec<_>>(), vec![(0, 1)]);
    }

    #[test]
    fn short_names_bucket_whole() {
        let nodes = [Node::new("Al", "person"), Node::new("al", "person"), Node::new("Bo", "person")];
        let pairs = BlockingIndex::build(nodes.iter(), 3).candidate_pairs();
        assert_eq!(pairs.into_iter().collect::<Vec<_>>(), vec![(0, 1)]);
    }

    #[test]
    fn punctuation_variants_share_a_bucket() {
        let nodes = [
            Node::new("CIA", "organization"),
            Node::new("C.I.A.", "organization"),
            Node::new("U.S. Army", "organization"),
            Node::new("US Army", "organization"),
        ];
        let pairs = BlockingIndex::build(nodes.iter(), 3).candidate_pairs();
        assert!(pairs.contains(&(0, 1)));
        assert!(pairs.contains(&(2, 3)));
    }

    #[test]
    fn empty_input() {
        let index = BlockingIndex::build(std::iter::empty(), 3);
        assert!(index.is_empty());
        assert!(index.candidate_pairs().is_empty());
    }
}
