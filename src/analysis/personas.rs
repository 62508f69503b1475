//! Per-run persona cache.
//!
//! Each section gets its persona generated at most once per run. The
//! first caller for a section runs the generation; concurrent callers for
//! the same section wait on it instead of generating their own. A failed
//! generation leaves the slot empty so a later window can try again.

use crate::error::OracleError;
use crate::models::{Persona, Question, Section, SectionId};
use crate::oracle::Oracle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// A persona handed out by the cache.
#[derive(Debug, Clone)]
pub struct PersonaLookup {
    pub persona: Arc<Persona>,
    /// Whether this call ran the generation (as opposed to reusing it).
    pub generated: bool,
}

#[derive(Debug, Default)]
pub struct PersonaCache {
    slots: HashMap<SectionId, OnceCell<Arc<Persona>>>,
}

impl PersonaCache {
    /// Creates an empty slot per section.
    pub fn new<'a, I>(sections: I) -> Self
    where
        I: IntoIterator<Item = &'a Section>,
    {
        let slots = sections
            .into_iter()
            .map(|s| (s.id.clone(), OnceCell::new()))
            .collect();
        Self { slots }
    }

    /// Returns the section's persona, generating it on first use.
    ///
    /// Exactly one successful call per section reports `generated`.
    pub async fn get_or_generate<O>(
        &self,
        oracle: &O,
        section: &Section,
        questions: &[Question],
    ) -> Result<PersonaLookup, OracleError>
    where
        O: Oracle + ?Sized,
    {
        let slot = self.slots.get(&section.id).ok_or_else(|| {
            OracleError::Failed(format!("no persona slot for section '{}'", section.id))
        })?;

        if let Some(persona) = slot.get() {
            debug!(section = %section.id, "Persona cache hit");
            return Ok(PersonaLookup {
                persona: Arc::clone(persona),
                generated: false,
            });
        }

        let generated = AtomicBool::new(false);
        let persona = slot
            .get_or_try_init(|| async {
                info!(section = %section.id, "Generating persona");
                let mut persona = oracle.generate_persona(section, questions).await?;
                persona.section_id = section.id.clone();
                generated.store(true, Ordering::Relaxed);
                Ok::<_, OracleError>(Arc::new(persona))
            })
            .await?;

        Ok(PersonaLookup {
            persona: Arc::clone(persona),
            generated: generated.load(Ordering::Relaxed),
        })
    }

    /// Cached persona, if it has been generated.
    pub fn get(&self, section_id: &str) -> Option<Arc<Persona>> {
        self.slots.get(section_id)?.get().cloned()
    }

    /// Number of sections with a persona.
    pub fn ready_count(&self) -> usize {
        self.slots.values().filter(|slot| slot.initialized()).count()
    }
}
