//! Near-duplicate suppression by character-trigram Jaccard similarity.
//!
//! Candidates are walked in rank order. Each accepted candidate's text is
//! lowercased, whitespace-collapsed and reduced to its set of character
//! trigrams; a later candidate whose similarity to any accepted one exceeds
//! the threshold is dropped.

use std::collections::HashSet;

use crate::chunk::normalize_text;

pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.83;

/// Normalized text plus its trigram set.
#[derive(Debug, Clone)]
pub struct Shingles {
    normalized: String,
    grams: HashSet<[char; 3]>,
    short: bool,
}

impl Shingles {
    pub fn new(text: &str) -> Self {
        let normalized = normalize_text(text).to_lowercase();
        let chars: Vec<char> = normalized.chars().collect();
        let grams = chars.windows(3).map(|w| [w[0], w[1], w[2]]).collect();
        Self {
            short: chars.len() < 3,
            normalized,
            grams,
        }
    }

    /// Jaccard similarity of the two trigram sets. Texts too short to have a
    /// trigram are similar only when identical.
    pub fn similarity(&self, other: &Shingles) -> f64 {
        if self.short || other.short {
            return if self.normalized == other.normalized { 1.0 } else { 0.0 };
        }
        let intersection = self.grams.intersection(&other.grams).count();
        let union = self.grams.len() + other.grams.len() - intersection;
        if union == 0 {
            return 1.0;
        }
        intersection as f64 / union as f64
    }
}

pub fn jaccard(a: &str, b: &str) -> f64 {
    Shingles::new(a).similarity(&Shingles::new(b))
}

/// Keep at most `limit` candidates, in order, none of which is more than
/// `threshold`-similar to an earlier kept one.
pub fn dedup<T, F>(
    candidates: impl IntoIterator<Item = T>,
    text_of: F,
    threshold: f64,
    limit: usize,
) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut kept: Vec<T> = Vec::new();
    let mut kept_shingles: Vec<Shingles> = Vec::new();

    for candidate in candidates {
        if kept.len() >= limit {
            break;
        }
        let shingles = Shingles::new(text_of(&candidate));
        if kept_shingles.iter().any(|s| s.similarity(&shingles) > threshold) {
            continue;
        }
        kept_shingles.push(shingles);
        kept.push(candidate);
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identical_texts() {
        assert_eq!(jaccard("Hello World", "hello   world"), 1.0);
    }

    #[test]
    fn test_short_texts() {
        assert_eq!(jaccard("ab", "AB"), 1.0);
        assert_eq!(jaccard("ab", "ac"), 0.0);
        assert_eq!(jaccard("ab", "abc"), 0.0);
    }

    #[test]
    fn test_disjoint_texts() {
        assert_eq!(jaccard("aaaa", "bbbb"), 0.0);
    }

    #[test]
    fn test_near_duplicate_dropped() {
        let items = vec![
            "WebSocket reconnect uses exponential backoff capped at 30 seconds.",
            "WebSocket reconnect uses exponential backoff capped at 30 seconds!",
            "Database pool size is twenty connections.",
        ];
        let kept = dedup(items, |s| *s, DEFAULT_DEDUP_THRESHOLD, 6);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].ends_with("seconds."));
        assert!(kept[1].starts_with("Database"));
    }

    #[test]
    fn test_limit_respected() {
        let items: Vec<String> = (0..10)
            .map(|i| format!("distinct topic number {} {}", i, "x".repeat(i)))
            .collect();
        let kept = dedup(items, |s| s.as_str(), 1.0, 3);
        assert_eq!(kept.len(), 3);
    }

    proptest! {
        #[test]
        fn prop_kept_pairs_below_threshold(
            texts in proptest::collection::vec("[ab ]{0,12}", 0..15),
            threshold in 0.0f64..1.0,
        ) {
            let kept = dedup(texts.iter(), |s| s.as_str(), threshold, 6);
            prop_assert!(kept.len() <= 6);
            for i in 0..kept.len() {
                for j in (i + 1)..kept.len() {
                    prop_assert!(jaccard(kept[i], kept[j]) <= threshold);
                }
            }
        }

        #[test]
        fn prop_order_preserved(texts in proptest::collection::vec("[a-z]{3,8}", 0..10)) {
            let indexed: Vec<(usize, &String)> = texts.iter().enumerate().collect();
            let kept = dedup(indexed, |(_, s)| s.as_str(), DEFAULT_DEDUP_THRESHOLD, 10);
            for pair in kept.windows(2) {
                prop_assert!(pair[0].0 < pair[1].0);
            }
        }
    }
}
