//! Section/question registry.
//!
//! The question battery is static input loaded once per run from a TOML
//! file:
//!
//! ```toml
//! [[sections]]
//! id = "safety"
//! name = "Safety Requirements"
//!
//! [[questions]]
//! id = "safety-1"
//! section = "safety"
//! text = "Which hazards does the document identify?"
//! required = true
//! ```

use crate::error::AnalysisError;
use crate::models::{Question, QuestionId, Section, SectionId};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Raw registry file contents, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub sections: Vec<SectionEntry>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

/// A section declaration in the registry file.
#[derive(Debug, Clone, Deserialize)]
pub struct SectionEntry {
    pub id: SectionId,
    pub name: String,
}

impl RegistryConfig {
    /// Parses registry TOML.
    pub fn from_toml(content: &str) -> Result<Self, AnalysisError> {
        toml::from_str(content)
            .map_err(|e| AnalysisError::Config(format!("invalid question registry: {}", e)))
    }

    /// Reads and parses a registry file.
    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::Config(format!(
                "cannot read question registry {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }
}

/// Validated, read-only question battery grouped into sections.
#[derive(Debug, Clone)]
pub struct QuestionRegistry {
    sections: Vec<Section>,
    questions_by_id: HashMap<QuestionId, Question>,
}

impl QuestionRegistry {
    /// Validates a raw registry.
    ///
    /// Fails when a question names an unknown section, a section has no
    /// questions, or section/question ids collide.
    pub fn new(config: RegistryConfig) -> Result<Self, AnalysisError> {
        if config.sections.is_empty() {
            return Err(AnalysisError::Config(
                "question registry declares no sections".to_string(),
            ));
        }

        let mut section_ids = HashSet::new();
        for entry in &config.sections {
            if !section_ids.insert(entry.id.as_str()) {
                return Err(AnalysisError::Config(format!(
                    "duplicate section id '{}'",
                    entry.id
                )));
            }
        }

        let mut questions_by_id: HashMap<QuestionId, Question> = HashMap::new();
        let mut by_section: HashMap<&str, Vec<QuestionId>> = HashMap::new();

        for question in &config.questions {
            if !section_ids.contains(question.section_id.as_str()) {
                return Err(AnalysisError::Config(format!(
                    "question '{}' references unknown section '{}'",
                    question.id, question.section_id
                )));
            }
            if questions_by_id.contains_key(&question.id) {
                return Err(AnalysisError::Config(format!(
                    "duplicate question id '{}'",
                    question.id
                )));
            }
            if question.text.trim().is_empty() {
                return Err(AnalysisError::Config(format!(
                    "question '{}' has no text",
                    question.id
                )));
            }

            by_section
                .entry(question.section_id.as_str())
                .or_default()
                .push(question.id.clone());
            questions_by_id.insert(question.id.clone(), question.clone());
        }

        let mut sections = Vec::with_capacity(config.sections.len());
        for entry in &config.sections {
            let question_ids = by_section.remove(entry.id.as_str()).unwrap_or_default();
            if question_ids.is_empty() {
                return Err(AnalysisError::Config(format!(
                    "section '{}' has no questions",
                    entry.id
                )));
            }
            sections.push(Section {
                id: entry.id.clone(),
                name: entry.name.clone(),
                question_ids,
            });
        }

        debug!(
            "Loaded {} sections with {} questions",
            sections.len(),
            questions_by_id.len()
        );

        Ok(Self {
            sections,
            questions_by_id,
        })
    }

    /// Loads and validates a registry file.
    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        Self::new(RegistryConfig::load(path)?)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions_by_id.get(id)
    }

    /// All questions in section order, then registry order.
    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.sections
            .iter()
            .flat_map(|s| s.question_ids.iter())
            .filter_map(|id| self.questions_by_id.get(id))
    }

    /// Questions of one section, in registry order.
    pub fn section_questions(&self, section: &Section) -> Vec<Question> {
        section
            .question_ids
            .iter()
            .filter_map(|id| self.questions_by_id.get(id).cloned())
            .collect()
    }

    pub fn question_count(&self) -> usize {
        self.questions_by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"
[[sections]]
id = "scope"
name = "Scope"

[[sections]]
id = "safety"
name = "Safety"

[[questions]]
id = "q1"
section = "scope"
text = "What does the system cover?"
required = true

[[questions]]
id = "q2"
section = "safety"
text = "Which hazards are listed?"

[[questions]]
id = "q3"
section = "scope"
text = "What is explicitly excluded?"
"#;

    #[test]
    fn test_parse_registry() {
        let registry = QuestionRegistry::new(RegistryConfig::from_toml(REGISTRY).unwrap()).unwrap();

        assert_eq!(registry.sections().len(), 2);
        assert_eq!(registry.question_count(), 3);
        assert_eq!(registry.sections()[0].question_ids, vec!["q1", "q3"]);
        assert!(registry.question("q1").unwrap().required);
        assert!(!registry.question("q2").unwrap().required);

        let order: Vec<&str> = registry.questions().map(|q| q.id.as_str()).collect();
        assert_eq!(order, vec!["q1", "q3", "q2"]);
    }

    #[test]
    fn test_unknown_section_rejected() {
        let toml = r#"
[[sections]]
id = "a"
name = "A"

[[questions]]
id = "q1"
section = "a"
text = "ok"

[[questions]]
id = "q2"
section = "missing"
text = "orphan"
"#;
        let err = QuestionRegistry::new(RegistryConfig::from_toml(toml).unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown section 'missing'"));
    }

    #[test]
    fn test_empty_section_rejected() {
        let toml = r#"
[[sections]]
id = "a"
name = "A"

[[sections]]
id = "b"
name = "B"

[[questions]]
id = "q1"
section = "a"
text = "ok"
"#;
        let err = QuestionRegistry::new(RegistryConfig::from_toml(toml).unwrap()).unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
        assert!(err.to_string().contains("section 'b' has no questions"));
    }

    #[test]
    fn test_duplicate_question_rejected() {
        let toml = r#"
[[sections]]
id = "a"
name = "A"

[[questions]]
id = "q1"
section = "a"
text = "first"

[[questions]]
id = "q1"
section = "a"
text = "second"
"#;
        let err = QuestionRegistry::new(RegistryConfig::from_toml(toml).unwrap()).unwrap_err();
        assert!(err.to_string().contains("duplicate question id 'q1'"));
    }

    #[test]
    fn test_duplicate_section_rejected() {
        let toml = r#"
[[sections]]
id = "a"
name = "A"

[[sections]]
id = "a"
name = "Again"
"#;
        let err = QuestionRegistry::new(RegistryConfig::from_toml(toml).unwrap()).unwrap_err();
        assert!(err.to_string().contains("duplicate section id"));
    }

    #[test]
    fn test_no_sections_rejected() {
        assert!(QuestionRegistry::new(RegistryConfig::default()).is_err());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            RegistryConfig::from_toml("[[sections]\nid ="),
            Err(AnalysisError::Config(_))
        ));
    }
}
