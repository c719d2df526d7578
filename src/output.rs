//! Output formatting and styling module.
//!
//! Provides a centralized interface for all CLI output: colored messages,
//! engine log lines, progress bars and summary tables. The library modules
//! never print; only the CLI calls into this module.

use crate::batch::{BatchReport, BatchStatus};
use crate::organizer::RunStats;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

/// Manages all CLI output with consistent styling and formatting.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tidybox::output::OutputFormatter;
    /// OutputFormatter::success("Settings saved");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Styles one line of engine output by what it reports.
    pub fn styled_log_line(line: &str) -> String {
        if line.starts_with("ERROR") || line.starts_with("Failed") {
            line.red().to_string()
        } else if line.starts_with("[Dry Run]") {
            line.yellow().to_string()
        } else if line.starts_with("Moved") || line.starts_with("Renamed") {
            line.green().to_string()
        } else if line.starts_with("---") || line.starts_with("===") {
            line.bold().to_string()
        } else {
            line.to_string()
        }
    }

    /// Creates a progress bar for file operations.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tidybox::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_with_message("Completed!");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }

    /// Prints the counters of one organize run.
    pub fn run_summary(stats: &RunStats, dry_run: bool) {
        Self::header("SUMMARY");

        let moved_label = if dry_run { "Would move" } else { "Moved" };
        let rows = [
            (moved_label, stats.moved.to_string().green()),
            ("Renamed", stats.renamed.to_string().normal()),
            (
                "Errors",
                if stats.errors > 0 {
                    stats.errors.to_string().red()
                } else {
                    stats.errors.to_string().normal()
                },
            ),
            ("Folders removed", stats.removed_dirs.to_string().normal()),
        ];
        let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        for (label, value) in rows {
            println!("{:<width$} | {}", label, value, width = width);
        }

        if stats.rolled_back {
            Self::warning("The run was rolled back after an error.");
        }
        if stats.stopped {
            Self::warning("The run was stopped before all files were processed.");
        }
    }

    /// Prints a table with one row per batch folder.
    pub fn batch_table(report: &BatchReport) {
        Self::header("BATCH SUMMARY");

        let width = report
            .outcomes
            .iter()
            .map(|o| o.path.display().to_string().len())
            .max()
            .unwrap_or(0)
            .max(6);

        println!("{:<width$} | {}", "Folder".bold(), "Status".bold(), width = width);
        println!("{}", "-".repeat(width + 20));
        for outcome in &report.outcomes {
            let status = match &outcome.status {
                BatchStatus::Done => outcome.status.to_string().green(),
                BatchStatus::NotFound | BatchStatus::Error(_) => outcome.status.to_string().red(),
                _ => outcome.status.to_string().normal(),
            };
            let moved = outcome
                .stats
                .as_ref()
                .map(|s| format!(" ({} moved)", s.moved))
                .unwrap_or_default();
            println!(
                "{:<width$} | {}{}",
                outcome.path.display(),
                status,
                moved,
                width = width
            );
        }
        println!("{}", "-".repeat(width + 20));
        println!(
            "{:<width$} | {} moved",
            "Total".bold(),
            report.total_moved().to_string().green().bold(),
            width = width
        );
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    pub fn path_list(paths: &[impl AsRef<Path>]) {
        for (index, path) in paths.iter().enumerate() {
            println!("{:>3}. {}", index + 1, path.as_ref().display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_styled_log_line_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(
            OutputFormatter::styled_log_line("Moved: a.jpg -> Images/a.jpg"),
            "Moved: a.jpg -> Images/a.jpg"
        );
        assert_eq!(OutputFormatter::styled_log_line("ERROR moving x"), "ERROR moving x");
    }
}
