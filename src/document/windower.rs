//! Slices a page sequence into fixed-size contiguous windows.

use crate::error::AnalysisError;
use crate::models::{Page, Window};

/// Splits `pages` into windows of `size` pages each.
///
/// Windows are contiguous, non-overlapping and cover every page exactly
/// once; the last window may be shorter. An empty page sequence yields no
/// windows.
pub fn make_windows(pages: &[Page], size: usize) -> Result<Vec<Window>, AnalysisError> {
    if size == 0 {
        return Err(AnalysisError::Config(
            "window size must be at least 1 page".to_string(),
        ));
    }

    Ok(pages
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| Window::new(index, chunk.to_vec()))
        .collect())
}

/// Number of windows `page_count` pages produce at the given size.
pub fn window_count(page_count: usize, size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    page_count.div_ceil(size)
}
