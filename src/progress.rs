//! Progress reporting for a crawl
//!
//! Provides a live spinner and a final summary. Both write to stderr;
//! stdout carries the listed paths.

use crate::crawler::CrawlProgress;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner showing crawl counters
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        // Falls back to the plain default style if the template is rejected
        if let Ok(spinner) = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            bar.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &CrawlProgress) {
        let mut msg = format!(
            "Dirs: {} | Entries: {} | Rate: {:.0}/s",
            format_number(progress.dirs_listed),
            format_number(progress.entries),
            progress.entries_per_second(),
        );

        if progress.dir_errors > 0 {
            msg.push_str(&format!(" | Errors: {}", format_number(progress.dir_errors)));
        }
        if progress.retired_connections > 0 {
            msg.push_str(&format!(" | Retired: {}", progress.retired_connections));
        }

        self.bar.set_message(msg);
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the crawl to stderr
pub fn print_summary(source: &str, progress: &CrawlProgress, completed: bool) {
    let title = if completed {
        style("Crawl Complete").green().bold()
    } else {
        style("Crawl Incomplete").red().bold()
    };

    eprintln!();
    eprintln!("{}", title);
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Source:").bold(), source);
    eprintln!(
        "  {} {}",
        style("Directories:").bold(),
        format_number(progress.dirs_listed)
    );
    eprintln!(
        "  {} {}",
        style("Entries:").bold(),
        format_number(progress.entries)
    );
    eprintln!(
        "  {} {:.1}s ({:.0} entries/sec)",
        style("Duration:").bold(),
        progress.elapsed.as_secs_f64(),
        progress.entries_per_second()
    );
    if progress.dir_errors > 0 {
        eprintln!(
            "  {} {}",
            style("Skipped dirs:").yellow().bold(),
            format_number(progress.dir_errors)
        );
    }
    if progress.retired_connections > 0 {
        eprintln!(
            "  {} {}",
            style("Retired connections:").yellow().bold(),
            progress.retired_connections
        );
    }
    eprintln!();
}
