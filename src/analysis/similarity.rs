//! Bag-of-words text similarity used to deduplicate answers.

use std::collections::HashSet;

/// Lowercased whitespace tokens of `text`.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Jaccard similarity of the token sets of `a` and `b`.
///
/// Two empty texts are identical (1.0); an empty text shares nothing with
/// a non-empty one (0.0).
pub fn jaccard(a: &str, b: &str) -> f64 {
    jaccard_sets(&tokenize(a), &tokenize(b))
}

/// Jaccard similarity of two pre-tokenized sets.
pub fn jaccard_sets(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts() {
        assert_eq!(jaccard("Answer A", "Answer A"), 1.0);
        assert_eq!(jaccard("word", "word"), 1.0);
    }

    #[test]
    fn test_case_insensitive_and_whitespace() {
        assert_eq!(jaccard("The Pump  fails", "the pump\nFAILS"), 1.0);
    }

    #[test]
    fn test_empty_texts() {
        assert_eq!(jaccard("", ""), 1.0);
        assert_eq!(jaccard("   ", ""), 1.0);
        assert_eq!(jaccard("", "something"), 0.0);
        assert_eq!(jaccard("something", ""), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        // {a, b, c} vs {b, c, d}: 2 shared of 4 total
        assert_eq!(jaccard("a b c", "b c d"), 0.5);
        // {a, b, c, d} vs {a, b, c}: 3 of 4
        assert_eq!(jaccard("a b c d", "a b c"), 0.75);
    }

    #[test]
    fn test_symmetric() {
        let pairs = [("x y z", "y"), ("alpha beta", "beta gamma delta"), ("", "q")];
        for (a, b) in pairs {
            assert_eq!(jaccard(a, b), jaccard(b, a));
        }
    }

    #[test]
    fn test_no_stemming() {
        assert_eq!(jaccard("valve", "valves"), 0.0);
    }

    #[test]
    fn test_duplicate_tokens_count_once() {
        assert_eq!(jaccard("a a a b", "a b"), 1.0);
    }
}
