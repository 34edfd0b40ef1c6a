use console::{measure_text_width, style};
use std::iter;

use crate::config::ValidatedConfig;
use crate::migrate::MigrationSummary;
use crate::orchestrator::PushReport;

/// Prints a colorized, boxed block of lines.
///
/// The box is sized to the widest **visible** line, using
/// [`console::measure_text_width`] so that ANSI color codes embedded in the
/// content do not throw off the padding. Borders are styled independently
/// from the inner text.
fn print_boxed(lines: Vec<String>) {
    let max_width = lines
        .iter()
        .map(|l| measure_text_width(l))
        .max()
        .unwrap_or(0)
        + 2;

    let border = "═".repeat(max_width);
    let top = style(format!("╔{}╗", border)).blue().bold();
    let bottom = style(format!("╚{}╝", border)).blue().bold();
    let left = style("║ ").blue().bold().to_string();
    let right = style("║").blue().bold().to_string();

    println!();
    println!("{top}");
    for line in lines {
        let visible = measure_text_width(&line);
        let pad = max_width - visible; // includes the one space after left border
        println!("{}{}{}{}", left, line, " ".repeat(pad - 1), right);
    }
    println!("{bottom}");
    println!();
}

/// Prints the plan for a migration before anything is touched.
///
/// # Parameters
///
/// * `config` – The validated configuration to describe.
/// * `source` – Where history comes from (a URL or the current repository).
/// * `destination` – Where it is pushed, if anywhere.
pub fn print_plan(config: &ValidatedConfig, source: &str, destination: Option<&str>) {
    print_boxed(plan_lines(config, source, destination));
}

/// Prints the completion summary.
pub fn print_summary(summary: &MigrationSummary, push: Option<&PushReport>) {
    print_boxed(summary_lines(summary, push));
}

/// Constructs the lines of the plan banner.
///
/// In interactive mode the instruction lines are yellow + bold; in batch
/// mode they are cyan. Consumers measuring width should use visible width.
fn plan_lines(config: &ValidatedConfig, source: &str, destination: Option<&str>) -> Vec<String> {
    let top = ["Migrate commit identities across the full history", ""]
        .into_iter()
        .map(|s| s.to_string());

    let mode = if config.interactive() {
        vec![
            style("Interactive mode: you'll decide commit by commit.")
                .yellow()
                .bold()
                .to_string(),
            style("Keys: [E]dit [A]pply [S]kip [D]efault for rest [Q]uit")
                .yellow()
                .to_string(),
        ]
    } else {
        vec![
            style("Batch mode: every matching commit is rewritten.")
                .cyan()
                .bold()
                .to_string(),
            style("(Use --interactive to choose commit by commit.)")
                .cyan()
                .to_string(),
        ]
    }
    .into_iter();

    let names = config
        .matcher()
        .old_names()
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let bottom = iter::once(String::new())
        .chain(iter::once(format!("Source:       {}", source)))
        .chain(iter::once(format!(
            "Destination:  {}",
            destination.unwrap_or("(not pushed)")
        )))
        .chain(iter::once(format!("Old names:    {}", names)))
        .chain(iter::once(format!("New identity: {}", config.new_identity())))
        .chain(iter::once(format!("Signatures:   {}", config.signing())))
        .chain(iter::once(String::new()))
        .chain(
            [
                "Commit dates and file contents are preserved;",
                "every descendant of a rewritten commit gets a new hash.",
            ]
            .into_iter()
            .map(|s| s.to_string()),
        );

    top.chain(mode).chain(bottom).collect()
}

fn summary_lines(summary: &MigrationSummary, push: Option<&PushReport>) -> Vec<String> {
    let mut lines = vec![
        style("Migration complete").green().bold().to_string(),
        String::new(),
        format!("Commits scanned:     {}", summary.commits_scanned),
        format!("Commits matched:     {}", summary.commits_matched),
        format!("Commits rewritten:   {}", summary.commits_rewritten),
        format!("Authors changed:     {}", summary.authors_changed),
        format!("Committers changed:  {}", summary.committers_changed),
        format!("Refs updated:        {}", summary.refs_updated),
        format!("Signatures:          {}", summary.signing),
    ];
    if summary.messages_changed > 0 {
        lines.push(format!("Messages changed:    {}", summary.messages_changed));
    }
    if summary.no_matches {
        lines.push(
            style("No commits matched the configured names.")
                .yellow()
                .to_string(),
        );
    }
    if summary.interactive_aborted {
        lines.push(
            style("Stopped early; unvisited commits were left unchanged.")
                .yellow()
                .to_string(),
        );
    }
    if let Some(push) = push {
        if push.branches_pushed {
            lines.push("Branches pushed to destination.".to_string());
        }
        if let Some(warning) = &push.tag_warning {
            lines.push(
                style(format!("Tags not pushed: {}", warning))
                    .yellow()
                    .to_string(),
            );
        } else if push.tags_pushed {
            lines.push("Tags pushed to destination.".to_string());
        }
    }
    lines
}
