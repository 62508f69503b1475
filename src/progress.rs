//! Terminal progress display driven by run events.

use docaudit::analysis::{Pass, ProgressEvent};
use docaudit::document::windower::window_count;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

/// Counts shown once the run finishes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProgressTally {
    pub windows_processed: usize,
    pub errors: usize,
    pub budget_trims: usize,
}

/// Consumes events until the channel closes, updating a progress bar over
/// windows of both passes.
pub async fn drive(
    mut receiver: UnboundedReceiver<ProgressEvent>,
    window_size: usize,
    show_bar: bool,
) -> ProgressTally {
    let bar = if show_bar {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut tally = ProgressTally::default();
    let mut windows = 0;

    while let Some(event) = receiver.recv().await {
        debug!(?event, "Progress event");
        match event {
            ProgressEvent::Ingested { page_count } => {
                windows = window_count(page_count, window_size) as u64;
                if let Some(ref pb) = bar {
                    pb.set_length(windows);
                }
            }
            ProgressEvent::SecondPassStarted { question_count } if question_count > 0 => {
                if let Some(ref pb) = bar {
                    pb.inc_length(windows);
                }
            }
            ProgressEvent::WindowStarted {
                pass, page_numbers, ..
            } => {
                if let Some(ref pb) = bar {
                    pb.set_message(window_message(pass, &page_numbers));
                }
            }
            ProgressEvent::WindowFinished { .. } => {
                tally.windows_processed += 1;
                if let Some(ref pb) = bar {
                    pb.inc(1);
                }
            }
            ProgressEvent::BudgetTrimmed { .. } => tally.budget_trims += 1,
            ProgressEvent::Error { .. } => tally.errors += 1,
            _ => {}
        }
    }

    if let Some(pb) = bar {
        pb.finish_and_clear();
    }
    tally
}

fn window_message(pass: Pass, pages: &[u32]) -> String {
    let label = match pass {
        Pass::First => "first pass",
        Pass::Second => "second pass",
    };
    match (pages.first(), pages.last()) {
        (Some(first), Some(last)) if first != last => format!("{}, pages {}-{}", label, first, last),
        (Some(page), _) => format!("{}, page {}", label, page),
        _ => label.to_string(),
    }
}
