//! Key filter: a byte trie with exact and wildcard-prefix terminators.
//!
//! A pattern ending in `*` matches any key carrying the preceding bytes as
//! a prefix; any other pattern matches exactly. An empty filter passes
//! every key.

use crate::types::collections::FxHashMap;

#[derive(Debug, Default)]
struct TrieNode {
    children: FxHashMap<u8, TrieNode>,
    /// Exact-match terminator.
    end: bool,
    /// Wildcard terminator: any continuation below this node matches.
    star: bool,
}

/// Prefix/exact key filter.
#[derive(Debug, Default)]
pub struct KeyFilter {
    root: TrieNode,
    patterns: usize,
}

impl KeyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a `|`-delimited pattern list; empty input yields the
    /// pass-everything filter.
    pub fn from_patterns(list: &str) -> Self {
        let mut filter = Self::new();
        for pat in list.split('|') {
            if !pat.is_empty() {
                filter.insert(pat.as_bytes());
            }
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.patterns == 0
    }

    /// Insert one pattern. A trailing `*` marks the node before it as a
    /// wildcard prefix; otherwise the final node is an exact terminator.
    pub fn insert(&mut self, pattern: &[u8]) {
        let (body, star) = match pattern.split_last() {
            Some((&b'*', rest)) => (rest, true),
            _ => (pattern, false),
        };

        let mut node = &mut self.root;
        for &b in body {
            node = node.children.entry(b).or_default();
        }
        if star {
            node.star = true;
        } else {
            node.end = true;
        }
        self.patterns += 1;
    }

    /// True if the key passes the filter.
    pub fn matches(&self, key: &[u8]) -> bool {
        if self.is_empty() {
            return true;
        }
        let mut node = &self.root;
        if node.star {
            return true;
        }
        for &b in key {
            node = match node.children.get(&b) {
                Some(child) => child,
                None => return false,
            };
            if node.star {
                return true;
            }
        }
        node.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_passes_everything() {
        let filter = KeyFilter::new();
        assert!(filter.matches(b"abc"));
        assert!(filter.matches(b""));
    }

    #[test]
    fn test_exact_and_prefix_patterns() {
        let filter = KeyFilter::from_patterns("abc|adf|bdf*|m*");

        assert!(filter.matches(b"abc"));
        assert!(!filter.matches(b"abcd"));
        assert!(!filter.matches(b"adff"));
        assert!(filter.matches(b"bdf"));
        assert!(filter.matches(b"bdfxyz"));
        assert!(filter.matches(b"m"));
        assert!(filter.matches(b"m1"));
        assert!(!filter.matches(b""));
        assert!(!filter.matches(b"p"));
    }

    #[test]
    fn test_bare_star_matches_all() {
        let filter = KeyFilter::from_patterns("*");
        assert!(filter.matches(b"abc"));
        assert!(filter.matches(b""));
    }

    #[test]
    fn test_non_utf8_keys() {
        let mut filter = KeyFilter::new();
        filter.insert(&[0xff, 0x00, b'*']);
        assert!(filter.matches(&[0xff, 0x00, 0x01, 0x02]));
        assert!(!filter.matches(&[0xfe]));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prefix_pattern_matches_every_extension(
                prefix in proptest::collection::vec(any::<u8>(), 0..32),
                suffix in proptest::collection::vec(any::<u8>(), 0..32),
            ) {
                let mut pattern = prefix.clone();
                pattern.push(b'*');
                let mut filter = KeyFilter::new();
                filter.insert(&pattern);

                let mut key = prefix;
                key.extend_from_slice(&suffix);
                prop_assert!(filter.matches(&key));
            }

            #[test]
            fn exact_pattern_matches_itself_and_no_extension(
                pattern in proptest::collection::vec(any::<u8>(), 0..32)
                    .prop_filter("no trailing wildcard", |p| p.last() != Some(&b'*')),
                extra in proptest::collection::vec(any::<u8>(), 1..8),
            ) {
                let mut filter = KeyFilter::new();
                filter.insert(&pattern);

                prop_assert!(filter.matches(&pattern));
                let mut extended = pattern;
                extended.extend_from_slice(&extra);
                prop_assert!(!filter.matches(&extended));
            }
        }
    }
}
