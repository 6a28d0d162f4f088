//! Run report rendering.
//!
//! One line per hook, `name...status`, in declaration order. Output of
//! failing hooks follows the line; passing output shows up only with
//! `--verbose` or a per-hook `verbose: true`.

use colored::{ColoredString, Colorize};

use super::{Outcome, RunSummary};

/// Column the status labels align to.
const WIDTH: usize = 72;

/// Print the aggregate report for one run.
pub fn print_summary(summary: &RunSummary, verbose: bool) {
    for result in &summary.results {
        println!("{}", status_line(&result.name, &result.outcome));

        if let Outcome::Errored { message } = &result.outcome {
            println!("{}", message.red());
        }

        let show_output = verbose || result.verbose || result.outcome.blocks();
        if show_output && !result.output.trim().is_empty() {
            println!("{}", result.output.trim_end());
        }
        if verbose && !matches!(result.outcome, Outcome::Skipped { .. }) {
            println!("- duration: {:.2}s", result.duration.as_secs_f64());
        }
    }
}

/// `name....(reason) Status` with the label colored by outcome.
fn status_line(name: &str, outcome: &Outcome) -> String {
    let label = colored_label(outcome);
    let annotation = match outcome {
        Outcome::Skipped { reason } => format!("({}) ", reason),
        _ => String::new(),
    };
    let used = name.chars().count() + annotation.chars().count() + outcome.label().len();
    let dots = WIDTH.saturating_sub(used).max(3);
    format!("{}{}{}{}", name, ".".repeat(dots), annotation, label)
}

fn colored_label(outcome: &Outcome) -> ColoredString {
    let label = outcome.label();
    match outcome {
        Outcome::Passed => label.green(),
        Outcome::Failed { .. } | Outcome::Errored { .. } => label.red(),
        Outcome::Modified => label.yellow(),
        Outcome::Skipped { .. } => label.cyan(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_alignment() {
        colored::control::set_override(false);
        let line = status_line("rustfmt", &Outcome::Passed);
        assert!(line.starts_with("rustfmt..."));
        assert!(line.ends_with("Passed"));
        assert_eq!(line.chars().count(), WIDTH);
    }

    #[test]
    fn test_skip_reason_is_shown() {
        colored::control::set_override(false);
        let line = status_line(
            "rustfmt",
            &Outcome::Skipped {
                reason: "no files to check".to_string(),
            },
        );
        assert!(line.contains("(no files to check) Skipped"));
    }

    #[test]
    fn test_long_names_keep_minimum_dots() {
        colored::control::set_override(false);
        let name = "x".repeat(100);
        let line = status_line(&name, &Outcome::Passed);
        assert!(line.contains("..."));
        assert!(line.ends_with("Passed"));
    }
}
