//! Text sources for discovering and validating document pages.
//!
//! Extraction from PDF/Office formats happens elsewhere; the core only
//! needs ordered pages with page numbers. This module provides a few
//! sources that read already-extracted text, plus the page invariant
//! checks every source must pass.

pub mod windower;

pub use windower::make_windows;

use crate::error::AnalysisError;
use crate::models::Page;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Page break emitted by common PDF-to-text extractors.
const FORM_FEED: char = '\x0c';

/// Anything that can hand the core an ordered sequence of pages.
pub trait TextSource: Send + Sync {
    /// Returns the pages of the document, numbered from 1.
    fn get_pages(&self) -> Result<Vec<Page>, AnalysisError>;

    /// Short human-readable description of where the pages come from.
    fn describe(&self) -> String;
}

/// A UTF-8 text file whose pages are separated by form feeds.
#[derive(Debug, Clone)]
pub struct PlainTextSource {
    path: PathBuf,
}

impl PlainTextSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Splits raw text into pages on form feeds.
    ///
    /// A trailing empty page after the last form feed is dropped, since
    /// extractors terminate the final page with a form feed too.
    pub fn split_pages(content: &str) -> Vec<Page> {
        let mut parts: Vec<&str> = content.split(FORM_FEED).collect();

        if parts.len() > 1 && parts.last().is_some_and(|p| p.trim().is_empty()) {
            parts.pop();
        }
        if parts.len() == 1 && parts[0].trim().is_empty() {
            return Vec::new();
        }

        parts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Page::new(i as u32 + 1, text.trim_end()))
            .collect()
    }
}

impl TextSource for PlainTextSource {
    fn get_pages(&self) -> Result<Vec<Page>, AnalysisError> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            AnalysisError::Ingestion(format!("cannot read {}: {}", self.path.display(), e))
        })?;

        let pages = Self::split_pages(&content);
        debug!("Split {} into {} pages", self.path.display(), pages.len());
        Ok(pages)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A directory holding one `.txt` file per page, ordered by file name.
#[derive(Debug, Clone)]
pub struct PageDirectorySource {
    dir: PathBuf,
}

impl PageDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn page_files(&self) -> Result<Vec<PathBuf>, AnalysisError> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                AnalysisError::Ingestion(format!("cannot walk {}: {}", self.dir.display(), e))
            })?;

            let path = entry.path();
            let is_page = entry.file_type().is_file()
                && path.extension().and_then(|e| e.to_str()) == Some("txt");
            if is_page {
                files.push(path.to_path_buf());
            } else {
                debug!("Skipping non-page entry {}", path.display());
            }
        }

        files.sort();
        Ok(files)
    }
}

impl TextSource for PageDirectorySource {
    fn get_pages(&self) -> Result<Vec<Page>, AnalysisError> {
        let files = self.page_files()?;
        let mut pages = Vec::with_capacity(files.len());

        for (i, file) in files.iter().enumerate() {
            let text = fs::read_to_string(file).map_err(|e| {
                AnalysisError::Ingestion(format!("cannot read {}: {}", file.display(), e))
            })?;
            pages.push(Page::new(i as u32 + 1, text.trim_end()));
        }

        Ok(pages)
    }

    fn describe(&self) -> String {
        format!("{}/ (one file per page)", self.dir.display())
    }
}

/// Pages handed over directly by the caller.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    pages: Vec<Page>,
}

impl InMemorySource {
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    /// Numbers the given texts as pages 1..=n.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Page::new(i as u32 + 1, text))
            .collect();
        Self { pages }
    }
}

impl TextSource for InMemorySource {
    fn get_pages(&self) -> Result<Vec<Page>, AnalysisError> {
        Ok(self.pages.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory document ({} pages)", self.pages.len())
    }
}

/// Picks a source for a path: directories are read page-per-file.
pub fn source_for_path(path: &Path) -> Box<dyn TextSource> {
    if path.is_dir() {
        Box::new(PageDirectorySource::new(path))
    } else {
        Box::new(PlainTextSource::new(path))
    }
}

/// Checks the page invariants: non-empty, numbered 1..=n without gaps or
/// duplicates, and character counts matching the text.
pub fn validate_pages(pages: &[Page]) -> Result<(), AnalysisError> {
    if pages.is_empty() {
        return Err(AnalysisError::Ingestion("document has no pages".to_string()));
    }

    for (i, page) in pages.iter().enumerate() {
        let expected = i as u32 + 1;
        if page.number != expected {
            return Err(AnalysisError::Ingestion(format!(
                "page sequence broken at position {}: expected page {}, found page {}",
                i, expected, page.number
            )));
        }

        let actual = page.text.chars().count();
        if page.char_count != actual {
            return Err(AnalysisError::Ingestion(format!(
                "page {} reports {} characters but holds {}",
                page.number, page.char_count, actual
            )));
        }
    }

    // Blank pages are valid input; they just cannot yield answers.
    let blank = pages.iter().filter(|p| p.text.trim().is_empty()).count();
    if blank > 0 {
        warn!("{} of {} pages are blank", blank, pages.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_pages_on_form_feed() {
        let pages = PlainTextSource::split_pages("first page\x0csecond page\x0c");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0], Page::new(1, "first page"));
        assert_eq!(pages[1].number, 2);
        assert_eq!(pages[1].text, "second page");
    }

    #[test]
    fn test_split_pages_without_breaks_is_one_page() {
        let pages = PlainTextSource::split_pages("just one page\n");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "just one page");
    }

    #[test]
    fn test_split_empty_content() {
        assert!(PlainTextSource::split_pages("").is_empty());
        assert!(PlainTextSource::split_pages("  \n").is_empty());
    }

    #[test]
    fn test_plain_text_source_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.txt");
        fs::write(&path, "alpha\x0cbeta\x0cgamma").unwrap();

        let pages = PlainTextSource::new(&path).get_pages().unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2].text, "gamma");
        assert!(validate_pages(&pages).is_ok());
    }

    #[test]
    fn test_plain_text_source_missing_file() {
        let result = PlainTextSource::new("/nonexistent/doc.txt").get_pages();
        assert!(matches!(result, Err(AnalysisError::Ingestion(_))));
    }

    #[test]
    fn test_page_directory_source_orders_by_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("002.txt"), "second").unwrap();
        fs::write(dir.path().join("001.txt"), "first").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let source = PageDirectorySource::new(dir.path());
        let pages = source.get_pages().unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0], Page::new(1, "first"));
        assert_eq!(pages[1], Page::new(2, "second"));
    }

    #[test]
    fn test_source_for_path_picks_directory_source() {
        let dir = TempDir::new().unwrap();
        let source = source_for_path(dir.path());
        assert!(source.describe().contains("one file per page"));
    }

    #[test]
    fn test_validate_rejects_empty_document() {
        assert!(matches!(
            validate_pages(&[]),
            Err(AnalysisError::Ingestion(_))
        ));
    }

    #[test]
    fn test_validate_rejects_gaps_and_duplicates() {
        let gap = vec![Page::new(1, "a"), Page::new(3, "c")];
        assert!(validate_pages(&gap).is_err());

        let duplicate = vec![Page::new(1, "a"), Page::new(1, "b")];
        assert!(validate_pages(&duplicate).is_err());

        let starts_late = vec![Page::new(2, "b")];
        assert!(validate_pages(&starts_late).is_err());
    }

    #[test]
    fn test_validate_rejects_wrong_char_count() {
        let mut page = Page::new(1, "abc");
        page.char_count = 10;
        assert!(validate_pages(&[page]).is_err());
    }

    #[test]
    fn test_validate_accepts_all_blank() {
        let pages = vec![Page::new(1, " "), Page::new(2, "")];
        assert!(validate_pages(&pages).is_ok());
    }

    #[test]
    fn test_in_memory_source_numbers_pages() {
        let source = InMemorySource::from_texts(["one", "two"]);
        let pages = source.get_pages().unwrap();
        assert_eq!(pages[1], Page::new(2, "two"));
    }
}
