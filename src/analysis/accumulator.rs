//! Answer accumulation across windows.
//!
//! Every validated candidate answer is folded into a per-question list of
//! variants. A candidate whose text is similar enough to an existing
//! variant merges into it (pages union, confidence max); anything else
//! becomes a new variant. Nothing is ever removed: weaker variants stay
//! around as alternate findings.
//!
//! Each question has its own lock, so merges for different questions can
//! proceed in parallel while merges for the same question are serialized.

use crate::analysis::diagnostics::Diagnostics;
use crate::analysis::second_pass::Pass;
use crate::analysis::similarity::{jaccard_sets, tokenize};
use crate::error::Rejection;
use crate::models::{AnswerVariant, CandidateAnswer, QuestionId};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// What `accept` did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcceptOutcome {
    /// Became a new variant at this position.
    Appended { variant: usize },
    /// Merged into the variant at this position.
    Merged { variant: usize, similarity: f64 },
    /// Same (question, pass, window, text) was already accepted; ignored.
    Redelivered,
    /// Failed validation and was not stored.
    Dropped(Rejection),
}

impl AcceptOutcome {
    /// Whether the candidate was stored (appended or merged).
    pub fn is_stored(&self) -> bool {
        matches!(
            self,
            AcceptOutcome::Appended { .. } | AcceptOutcome::Merged { .. }
        )
    }
}

#[derive(Debug, Default)]
struct QuestionEntry {
    variants: Vec<AnswerVariant>,
    /// (pass, window, text) of every accepted candidate, for re-delivery
    /// detection. The second pass revisits windows, so the pass is part of
    /// the key.
    deliveries: HashSet<(Pass, usize, String)>,
}

/// Owner of the per-question variant lists for one run.
#[derive(Debug)]
pub struct Accumulator {
    entries: HashMap<QuestionId, Mutex<QuestionEntry>>,
    diagnostics: Arc<Diagnostics>,
}

impl Accumulator {
    /// Creates empty state for every known question.
    pub fn new<I>(question_ids: I, diagnostics: Arc<Diagnostics>) -> Self
    where
        I: IntoIterator<Item = QuestionId>,
    {
        let entries = question_ids
            .into_iter()
            .map(|id| (id, Mutex::new(QuestionEntry::default())))
            .collect();
        Self {
            entries,
            diagnostics,
        }
    }

    /// Folds a candidate delivered in `pass` into its question's variants
    /// using the given merge threshold (`similarity >= threshold` merges).
    pub fn accept(
        &self,
        pass: Pass,
        candidate: CandidateAnswer,
        threshold: f64,
    ) -> AcceptOutcome {
        if let Err(reason) = check_candidate(&candidate) {
            self.diagnostics.record_dropped(reason);
            return AcceptOutcome::Dropped(reason);
        }

        let Some(entry) = self.entries.get(&candidate.question_id) else {
            self.diagnostics.record_dropped(Rejection::UnknownQuestion);
            return AcceptOutcome::Dropped(Rejection::UnknownQuestion);
        };
        let mut entry = lock(entry);

        let delivery = (pass, candidate.window_index, candidate.text.clone());
        if entry.deliveries.contains(&delivery) {
            debug!(
                question = %candidate.question_id,
                window = candidate.window_index,
                ?pass,
                "Ignoring re-delivered answer"
            );
            self.diagnostics.record_redelivered();
            return AcceptOutcome::Redelivered;
        }
        entry.deliveries.insert(delivery);

        let outcome = match best_match(&entry.variants, &candidate.text) {
            Some((index, similarity)) if similarity >= threshold => {
                merge_into(&mut entry.variants[index], &candidate);
                AcceptOutcome::Merged {
                    variant: index,
                    similarity,
                }
            }
            _ => {
                entry.variants.push(AnswerVariant::seed(&candidate));
                AcceptOutcome::Appended {
                    variant: entry.variants.len() - 1,
                }
            }
        };

        debug!(
            question = %candidate.question_id,
            window = candidate.window_index,
            ?outcome,
            "Accepted answer"
        );
        outcome
    }

    /// Current variants of a question, in discovery order.
    pub fn variants(&self, question_id: &str) -> Vec<AnswerVariant> {
        self.entries
            .get(question_id)
            .map(|entry| lock(entry).variants.clone())
            .unwrap_or_default()
    }

    /// Highest confidence among a question's variants.
    pub fn best_confidence(&self, question_id: &str) -> Option<f64> {
        let entry = self.entries.get(question_id)?;
        let entry = lock(entry);
        entry
            .variants
            .iter()
            .map(|v| v.confidence)
            .max_by(f64::total_cmp)
    }

    /// Whether a question already has an answer at or above `floor`.
    pub fn is_satisfied(&self, question_id: &str, floor: f64) -> bool {
        self.best_confidence(question_id)
            .is_some_and(|confidence| confidence >= floor)
    }

    /// Number of questions with at least one variant.
    pub fn answered_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| !lock(entry).variants.is_empty())
            .count()
    }

    /// Freezes the accumulated state for compilation.
    pub fn finalize(self) -> QuestionState {
        let variants = self
            .entries
            .into_iter()
            .map(|(id, entry)| {
                let entry = entry.into_inner().unwrap_or_else(|e| e.into_inner());
                (id, entry.variants)
            })
            .collect();
        QuestionState { variants }
    }
}

/// Read-only, finalized answers of a run.
#[derive(Debug, Clone, Default)]
pub struct QuestionState {
    variants: HashMap<QuestionId, Vec<AnswerVariant>>,
}

impl QuestionState {
    /// Variants of a question in discovery order (empty if unanswered).
    pub fn variants(&self, question_id: &str) -> &[AnswerVariant] {
        self.variants
            .get(question_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Splits a question's variants into the primary answer and alternates.
    pub fn primary_and_alternates(
        &self,
        question_id: &str,
    ) -> (Option<&AnswerVariant>, Vec<&AnswerVariant>) {
        let variants = self.variants(question_id);
        match select_primary(variants) {
            Some(primary) => {
                let alternates = variants
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != primary)
                    .map(|(_, v)| v)
                    .collect();
                (Some(&variants[primary]), alternates)
            }
            None => (None, Vec::new()),
        }
    }

    pub fn question_ids(&self) -> impl Iterator<Item = &QuestionId> {
        self.variants.keys()
    }
}

/// Index of the canonical answer: highest confidence, then most
/// contributing windows, then earliest first-seen window.
pub fn select_primary(variants: &[AnswerVariant]) -> Option<usize> {
    variants
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| rank(a, b))
        .map(|(i, _)| i)
}

fn rank(a: &AnswerVariant, b: &AnswerVariant) -> Ordering {
    a.confidence
        .total_cmp(&b.confidence)
        .then_with(|| {
            a.contributing_windows
                .len()
                .cmp(&b.contributing_windows.len())
        })
        // Earlier discovery ranks higher.
        .then_with(|| b.first_seen_window().cmp(&a.first_seen_window()))
}

/// Rejects candidates that would break variant invariants.
fn check_candidate(candidate: &CandidateAnswer) -> Result<(), Rejection> {
    if candidate.pages.is_empty() {
        return Err(Rejection::MissingCitation);
    }
    if !candidate.confidence.is_finite() || !(0.0..=1.0).contains(&candidate.confidence) {
        return Err(Rejection::ConfidenceOutOfRange);
    }
    Ok(())
}

/// Most similar variant and its similarity. First one wins ties.
fn best_match(variants: &[AnswerVariant], text: &str) -> Option<(usize, f64)> {
    let tokens = tokenize(text);
    let mut best: Option<(usize, f64)> = None;

    for (i, variant) in variants.iter().enumerate() {
        let similarity = jaccard_sets(&tokens, &tokenize(&variant.text));
        if best.map_or(true, |(_, s)| similarity > s) {
            best = Some((i, similarity));
        }
    }

    best
}

fn merge_into(variant: &mut AnswerVariant, candidate: &CandidateAnswer) {
    let previous_confidence = variant.confidence;

    variant.pages.extend(candidate.pages.iter().copied());
    if !variant.contributing_windows.contains(&candidate.window_index) {
        variant.contributing_windows.push(candidate.window_index);
    }
    variant.confidence = previous_confidence.max(candidate.confidence);
    // Equal confidence keeps the existing wording.
    if candidate.confidence > previous_confidence {
        variant.text = candidate.text.clone();
    }
    variant.merge_count += 1;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    const FIRST_PASS: f64 = 0.75;

    fn candidate(text: &str, pages: &[u32], confidence: f64, window: usize) -> CandidateAnswer {
        CandidateAnswer {
            question_id: "q1".to_string(),
            text: text.to_string(),
            pages: pages.iter().copied().collect(),
            confidence,
            window_index: window,
        }
    }

    fn accumulator() -> (Accumulator, Arc<Diagnostics>) {
        let diagnostics = Arc::new(Diagnostics::new());
        let acc = Accumulator::new(
            ["q1".to_string(), "q2".to_string()],
            Arc::clone(&diagnostics),
        );
        (acc, diagnostics)
    }

    #[test]
    fn test_first_candidate_appends() {
        let (acc, _) = accumulator();
        let outcome = acc.accept(Pass::First, candidate("Answer A", &[1], 0.6, 0), FIRST_PASS);
        assert_eq!(outcome, AcceptOutcome::Appended { variant: 0 });

        let variants = acc.variants("q1");
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].merge_count, 0);
        assert_eq!(variants[0].contributing_windows, vec![0]);
    }

    #[test]
    fn test_identical_text_merges() {
        let (acc, _) = accumulator();
        acc.accept(Pass::First, candidate("Answer A", &[1], 0.6, 0), FIRST_PASS);
        let outcome = acc.accept(Pass::First, candidate("Answer A", &[2], 0.9, 1), FIRST_PASS);

        assert_eq!(
            outcome,
            AcceptOutcome::Merged {
                variant: 0,
                similarity: 1.0
            }
        );
        let variant = &acc.variants("q1")[0];
        assert_eq!(variant.text, "Answer A");
        assert_eq!(variant.pages, [1, 2].into_iter().collect::<BTreeSet<_>>());
        assert_eq!(variant.confidence, 0.9);
        assert_eq!(variant.contributing_windows, vec![0, 1]);
        assert_eq!(variant.merge_count, 1);
    }

    #[test]
    fn test_dissimilar_text_appends() {
        let (acc, _) = accumulator();
        acc.accept(Pass::First, candidate("Answer A", &[1], 0.6, 0), FIRST_PASS);
        let outcome = acc.accept(
            Pass::First,
            candidate("Completely different wording", &[2], 0.5, 1),
            FIRST_PASS,
        );
        assert_eq!(outcome, AcceptOutcome::Appended { variant: 1 });
        assert_eq!(acc.variants("q1").len(), 2);
    }

    #[test]
    fn test_threshold_boundary() {
        // "a b c d" vs "a b c": 3 shared of 4, exactly 0.75
        let (acc, _) = accumulator();
        acc.accept(Pass::First, candidate("a b c d", &[1], 0.5, 0), FIRST_PASS);
        let at = acc.accept(Pass::First, candidate("a b c", &[2], 0.5, 1), FIRST_PASS);
        assert!(matches!(at, AcceptOutcome::Merged { similarity, .. } if similarity == 0.75));

        // {a, b, c, d} vs {a, b, e}: 2 of 5 = 0.4, below 0.75
        let below = acc.accept(Pass::First, candidate("a b e", &[3], 0.5, 2), FIRST_PASS);
        assert_eq!(below, AcceptOutcome::Appended { variant: 1 });
    }

    #[test]
    fn test_lower_threshold_admits_weaker_match() {
        let (acc, _) = accumulator();
        acc.accept(Pass::First, candidate("a b c d", &[1], 0.5, 0), FIRST_PASS);
        // 0.4 similarity merges under a 0.30 threshold
        let outcome = acc.accept(Pass::First, candidate("a b e", &[3], 0.5, 1), 0.30);
        assert!(outcome.is_stored());
        assert_eq!(acc.variants("q1").len(), 1);
    }

    #[test]
    fn test_text_replaced_only_on_strictly_higher_confidence() {
        let (acc, _) = accumulator();
        acc.accept(Pass::First, candidate("the pump fails at high load", &[1], 0.7, 0), 0.5);

        // equal confidence keeps the existing text
        acc.accept(Pass::First, candidate("the pump fails at high loads", &[2], 0.7, 1), 0.5);
        assert_eq!(acc.variants("q1")[0].text, "the pump fails at high load");

        // lower confidence keeps it too
        acc.accept(Pass::First, candidate("pump fails at high load", &[3], 0.2, 2), 0.5);
        assert_eq!(acc.variants("q1")[0].text, "the pump fails at high load");

        // strictly higher replaces it
        acc.accept(Pass::First, candidate("the pump fails under high load", &[4], 0.8, 3), 0.5);
        let variant = &acc.variants("q1")[0];
        assert_eq!(variant.text, "the pump fails under high load");
        assert_eq!(variant.confidence, 0.8);
        assert_eq!(variant.merge_count, 3);
    }

    #[test]
    fn test_merges_into_most_similar_variant() {
        let (acc, _) = accumulator();
        acc.accept(Pass::First, candidate("red green blue", &[1], 0.5, 0), 0.3);
        acc.accept(Pass::First, candidate("one two three four", &[2], 0.5, 1), 0.3);
        let outcome = acc.accept(Pass::First, candidate("one two three", &[3], 0.5, 2), 0.3);
        assert!(matches!(outcome, AcceptOutcome::Merged { variant: 1, .. }));
    }

    #[test]
    fn test_missing_citation_dropped_and_counted() {
        let (acc, diagnostics) = accumulator();
        let outcome = acc.accept(Pass::First, candidate("Answer A", &[], 0.9, 0), FIRST_PASS);

        assert_eq!(outcome, AcceptOutcome::Dropped(Rejection::MissingCitation));
        assert!(acc.variants("q1").is_empty());
        assert_eq!(diagnostics.dropped_answers(), 1);
    }

    #[test]
    fn test_out_of_range_confidence_dropped() {
        let (acc, diagnostics) = accumulator();
        for confidence in [1.5, -0.1, f64::NAN, f64::INFINITY] {
            let outcome = acc.accept(
                Pass::First,
                candidate("Answer A", &[1], confidence, 0),
                FIRST_PASS,
            );
            assert_eq!(outcome, AcceptOutcome::Dropped(Rejection::ConfidenceOutOfRange));
        }
        assert!(acc.variants("q1").is_empty());
        assert_eq!(diagnostics.dropped_answers(), 4);
    }

    #[test]
    fn test_unknown_question_dropped() {
        let (acc, diagnostics) = accumulator();
        let mut c = candidate("Answer", &[1], 0.5, 0);
        c.question_id = "nope".to_string();
        assert_eq!(
            acc.accept(Pass::First, c, FIRST_PASS),
            AcceptOutcome::Dropped(Rejection::UnknownQuestion)
        );
        assert_eq!(diagnostics.dropped_answers(), 1);
    }

    #[test]
    fn test_redelivery_is_ignored() {
        let (acc, diagnostics) = accumulator();
        let c = candidate("Answer A", &[1], 0.6, 0);
        acc.accept(Pass::First, c.clone(), FIRST_PASS);
        assert_eq!(acc.accept(Pass::First, c, FIRST_PASS), AcceptOutcome::Redelivered);

        let variant = &acc.variants("q1")[0];
        assert_eq!(variant.merge_count, 0);
        assert_eq!(diagnostics.snapshot().redelivered_answers, 1);
    }

    #[test]
    fn test_second_pass_strengthens_same_window_answer() {
        let (acc, diagnostics) = accumulator();
        acc.accept(Pass::First, candidate("Answer A", &[1], 0.5, 0), FIRST_PASS);
        let outcome = acc.accept(Pass::Second, candidate("Answer A", &[1, 2], 0.9, 0), 0.30);

        assert!(matches!(outcome, AcceptOutcome::Merged { variant: 0, .. }));
        let variant = &acc.variants("q1")[0];
        assert_eq!(variant.confidence, 0.9);
        assert_eq!(variant.pages, [1, 2].into_iter().collect::<BTreeSet<_>>());
        assert_eq!(variant.contributing_windows, vec![0]);
        assert_eq!(variant.merge_count, 1);
        assert_eq!(diagnostics.snapshot().redelivered_answers, 0);

        // a repeat within the second pass is still a re-delivery
        let again = acc.accept(Pass::Second, candidate("Answer A", &[1, 2], 0.9, 0), 0.30);
        assert_eq!(again, AcceptOutcome::Redelivered);
    }

    #[test]
    fn test_same_window_different_text_is_not_redelivery() {
        let (acc, _) = accumulator();
        acc.accept(Pass::First, candidate("Answer A", &[1], 0.6, 0), FIRST_PASS);
        let outcome = acc.accept(Pass::First, candidate("answer a", &[2], 0.6, 0), FIRST_PASS);
        assert!(matches!(outcome, AcceptOutcome::Merged { .. }));
        // a window is listed once even if it contributes twice
        assert_eq!(acc.variants("q1")[0].contributing_windows, vec![0]);
    }

    #[test]
    fn test_pages_union_is_idempotent() {
        let (acc, _) = accumulator();
        acc.accept(Pass::First, candidate("Answer A", &[1, 2], 0.6, 0), FIRST_PASS);
        acc.accept(Pass::First, candidate("Answer A", &[1, 2], 0.6, 1), FIRST_PASS);
        let variant = &acc.variants("q1")[0];
        assert_eq!(variant.pages, [1, 2].into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn test_merge_monotonicity() {
        let (acc, _) = accumulator();
        let words = ["valve", "pump", "pressure", "limit", "bar", "ten", "test"];
        let mut seed: u64 = 42;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };

        let mut previous: Vec<AnswerVariant> = Vec::new();
        for window in 0..60 {
            let len = 1 + next() % 4;
            let text: Vec<&str> = (0..len).map(|_| words[next() % words.len()]).collect();
            let pages: Vec<u32> = (0..1 + next() % 3).map(|_| 1 + (next() % 20) as u32).collect();
            let confidence = (next() % 101) as f64 / 100.0;

            acc.accept(Pass::First, candidate(&text.join(" "), &pages, confidence, window), 0.5);

            let current = acc.variants("q1");
            assert!(current.len() >= previous.len());
            for (before, after) in previous.iter().zip(current.iter()) {
                assert!(before.pages.is_subset(&after.pages));
                assert!(after.confidence >= before.confidence);
                assert!(after.contributing_windows.starts_with(&before.contributing_windows));
                assert!(after.merge_count >= before.merge_count);
            }
            previous = current;
        }
    }

    #[test]
    fn test_concurrent_accepts_for_different_questions() {
        let diagnostics = Arc::new(Diagnostics::new());
        let ids: Vec<String> = (0..8).map(|i| format!("q{}", i)).collect();
        let acc = Arc::new(Accumulator::new(ids.clone(), diagnostics));

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let acc = Arc::clone(&acc);
                std::thread::spawn(move || {
                    for window in 0..50 {
                        let c = CandidateAnswer {
                            question_id: id.clone(),
                            text: "same answer".to_string(),
                            pages: [window as u32 + 1].into_iter().collect(),
                            confidence: 0.5,
                            window_index: window,
                        };
                        acc.accept(Pass::First, c, FIRST_PASS);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..8 {
            let variants = acc.variants(&format!("q{}", i));
            assert_eq!(variants.len(), 1);
            assert_eq!(variants[0].pages.len(), 50);
            assert_eq!(variants[0].merge_count, 49);
        }
    }

    fn variant(confidence: f64, windows: Vec<usize>) -> AnswerVariant {
        AnswerVariant {
            question_id: "q1".to_string(),
            text: format!("{} {:?}", confidence, windows),
            pages: [1].into_iter().collect(),
            confidence,
            contributing_windows: windows,
            merge_count: 0,
        }
    }

    #[test]
    fn test_select_primary_by_confidence() {
        let variants = vec![variant(0.6, vec![0]), variant(0.5, vec![1])];
        assert_eq!(select_primary(&variants), Some(0));
        assert_eq!(select_primary(&[]), None);
    }

    #[test]
    fn test_select_primary_tie_breaks() {
        // equal confidence: more contributing windows wins
        let variants = vec![variant(0.7, vec![0]), variant(0.7, vec![1, 2])];
        assert_eq!(select_primary(&variants), Some(1));

        // equal confidence and windows: earliest first-seen wins
        let variants = vec![variant(0.7, vec![3]), variant(0.7, vec![1])];
        assert_eq!(select_primary(&variants), Some(1));
    }

    #[test]
    fn test_finalize_keeps_alternates() {
        let (acc, _) = accumulator();
        acc.accept(Pass::First, candidate("Answer A", &[1], 0.6, 0), FIRST_PASS);
        acc.accept(
            Pass::First,
            candidate("Completely different wording", &[2], 0.5, 1),
            FIRST_PASS,
        );

        let state = acc.finalize();
        let (primary, alternates) = state.primary_and_alternates("q1");
        assert_eq!(primary.map(|v| v.text.as_str()), Some("Answer A"));
        assert_eq!(alternates.len(), 1);
        assert_eq!(alternates[0].text, "Completely different wording");

        let (primary, alternates) = state.primary_and_alternates("q2");
        assert!(primary.is_none());
        assert!(alternates.is_empty());
    }

    #[test]
    fn test_satisfaction_floor() {
        let (acc, _) = accumulator();
        assert!(!acc.is_satisfied("q1", 0.7));
        acc.accept(Pass::First, candidate("Answer A", &[1], 0.7, 0), FIRST_PASS);
        assert!(acc.is_satisfied("q1", 0.7));
        assert!(!acc.is_satisfied("q1", 0.71));
        assert_eq!(acc.answered_count(), 1);
    }
}
