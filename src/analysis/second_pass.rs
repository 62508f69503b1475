//! Pass settings and second-pass question selection.
//!
//! The first pass asks each window about every question not yet answered
//! at the acceptance floor. The second pass revisits the same windows and
//! personas, restricted to the questions that came out of the first pass
//! below the floor, and merges with a looser similarity threshold.

use crate::analysis::accumulator::Accumulator;
use crate::models::{Question, QuestionId};
use crate::questions::QuestionRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which pass a window is processed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    First,
    Second,
}

/// Similarity and confidence thresholds for both passes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_first_pass_merge")]
    pub first_pass_merge: f64,
    #[serde(default = "default_second_pass_merge")]
    pub second_pass_merge: f64,
    /// A question whose best confidence reaches this is satisfied.
    #[serde(default = "default_acceptance_floor")]
    pub acceptance_floor: f64,
    /// Minimum confidence the oracle is told to report in the second pass.
    #[serde(default = "default_second_pass_floor")]
    pub second_pass_floor: f64,
}

fn default_first_pass_merge() -> f64 {
    0.75
}

fn default_second_pass_merge() -> f64 {
    0.30
}

fn default_acceptance_floor() -> f64 {
    0.70
}

fn default_second_pass_floor() -> f64 {
    0.40
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            first_pass_merge: default_first_pass_merge(),
            second_pass_merge: default_second_pass_merge(),
            acceptance_floor: default_acceptance_floor(),
            second_pass_floor: default_second_pass_floor(),
        }
    }
}

impl Thresholds {
    /// Names of any thresholds outside [0, 1].
    pub fn out_of_range(&self) -> Vec<&'static str> {
        [
            ("first_pass_merge", self.first_pass_merge),
            ("second_pass_merge", self.second_pass_merge),
            ("acceptance_floor", self.acceptance_floor),
            ("second_pass_floor", self.second_pass_floor),
        ]
        .into_iter()
        .filter(|(_, value)| !(0.0..=1.0).contains(value))
        .map(|(name, _)| name)
        .collect()
    }
}

/// How a single pass merges and what it tells the oracle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassSettings {
    pub pass: Pass,
    /// `similarity >= merge_threshold` folds a candidate into a variant.
    pub merge_threshold: f64,
    /// Questions at or above this confidence are no longer asked.
    pub satisfied_floor: f64,
    pub threshold_hint: f64,
    pub broad_interpretation: bool,
}

impl PassSettings {
    pub fn first(thresholds: &Thresholds) -> Self {
        Self {
            pass: Pass::First,
            merge_threshold: thresholds.first_pass_merge,
            satisfied_floor: thresholds.acceptance_floor,
            threshold_hint: 0.0,
            broad_interpretation: false,
        }
    }

    pub fn second(thresholds: &Thresholds) -> Self {
        Self {
            pass: Pass::Second,
            merge_threshold: thresholds.second_pass_merge,
            satisfied_floor: thresholds.acceptance_floor,
            threshold_hint: thresholds.second_pass_floor,
            broad_interpretation: true,
        }
    }
}

/// Questions that go into the second pass: no variant yet, or a best
/// confidence below the acceptance floor. Registry order.
pub fn outstanding_questions(
    registry: &QuestionRegistry,
    accumulator: &Accumulator,
    acceptance_floor: f64,
) -> Vec<Question> {
    registry
        .questions()
        .filter(|q| !accumulator.is_satisfied(&q.id, acceptance_floor))
        .cloned()
        .collect()
}

/// Ids of `questions`, for scoping the dispatcher.
pub fn question_scope(questions: &[Question]) -> BTreeSet<QuestionId> {
    questions.iter().map(|q| q.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::diagnostics::Diagnostics;
    use crate::models::CandidateAnswer;
    use crate::questions::RegistryConfig;
    use std::sync::Arc;

    fn registry() -> QuestionRegistry {
        let config = RegistryConfig::from_toml(
            r#"
            [[sections]]
            id = "s1"
            name = "Safety"

            [[questions]]
            id = "q1"
            section = "s1"
            text = "What is the maximum pressure?"

            [[questions]]
            id = "q2"
            section = "s1"
            text = "Which valves are fitted?"

            [[questions]]
            id = "q3"
            section = "s1"
            text = "Who signs off?"
            "#,
        )
        .unwrap();
        QuestionRegistry::new(config).unwrap()
    }

    fn answer(id: &str, confidence: f64) -> CandidateAnswer {
        CandidateAnswer {
            question_id: id.to_string(),
            text: "an answer".to_string(),
            pages: [1].into_iter().collect(),
            confidence,
            window_index: 0,
        }
    }

    #[test]
    fn test_outstanding_selection() {
        let registry = registry();
        let acc = Accumulator::new(
            registry.questions().map(|q| q.id.clone()),
            Arc::new(Diagnostics::new()),
        );
        acc.accept(Pass::First, answer("q1", 0.9), 0.75);
        acc.accept(Pass::First, answer("q2", 0.5), 0.75);

        let outstanding = outstanding_questions(&registry, &acc, 0.70);
        let ids: Vec<&str> = outstanding.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q2", "q3"]);
    }

    #[test]
    fn test_floor_is_inclusive() {
        let registry = registry();
        let acc = Accumulator::new(
            registry.questions().map(|q| q.id.clone()),
            Arc::new(Diagnostics::new()),
        );
        acc.accept(Pass::First, answer("q1", 0.70), 0.75);
        let outstanding = outstanding_questions(&registry, &acc, 0.70);
        assert!(outstanding.iter().all(|q| q.id != "q1"));
    }

    #[test]
    fn test_pass_settings() {
        let thresholds = Thresholds::default();
        let first = PassSettings::first(&thresholds);
        assert_eq!(first.merge_threshold, 0.75);
        assert!(!first.broad_interpretation);

        let second = PassSettings::second(&thresholds);
        assert_eq!(second.pass, Pass::Second);
        assert_eq!(second.merge_threshold, 0.30);
        assert_eq!(second.threshold_hint, 0.40);
        assert!(second.broad_interpretation);
    }

    #[test]
    fn test_threshold_range_check() {
        assert!(Thresholds::default().out_of_range().is_empty());
        let bad = Thresholds {
            first_pass_merge: 1.2,
            acceptance_floor: -0.1,
            ..Default::default()
        };
        assert_eq!(bad.out_of_range(), vec!["first_pass_merge", "acceptance_floor"]);
    }
}
