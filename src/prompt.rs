use chrono::{DateTime, FixedOffset};
use console::{Term, style};
use dialoguer::{Confirm, Input, theme::ColorfulTheme};

use crate::commit::Timestamp;
use crate::error::PromptError;
use crate::identity::Identity;
use crate::policy::{Candidate, CustomRewrite, DecisionPrompter};

/// Abstraction over a string input prompt.
///
/// Implementors define how string input is collected from the user,
/// including any styling or interactivity. This trait enables testability
/// by decoupling user input from the logic that consumes it.
pub trait StringPrompter {
    /// Prompt the user for a string input.
    ///
    /// # Parameters
    /// - `prompt`: The message shown to the user.
    /// - `default`: Default value if the user presses Enter without input.
    ///
    /// # Returns
    /// `Ok(String)` if input is successfully collected, or an `Err(String)` describing the failure.
    fn prompt(&mut self, prompt: &str, default: &str) -> Result<String, String>;
}

/// Abstraction over a boolean (yes/no) confirmation prompt.
pub trait ConfirmPrompter {
    /// Prompt the user for a yes/no confirmation.
    ///
    /// # Returns
    /// `Ok(true)` if confirmed, `Ok(false)` if declined, or `Err(String)` on input failure.
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, String>;
}

/// Default implementation of `StringPrompter` using `dialoguer::Input`.
///
/// Uses the `ColorfulTheme` for user-friendly styling.
pub struct DialoguerStringPrompter;

impl StringPrompter for DialoguerStringPrompter {
    fn prompt(&mut self, prompt: &str, default: &str) -> Result<String, String> {
        let theme = ColorfulTheme::default();
        let mut input = Input::<String>::with_theme(&theme).with_prompt(prompt);
        if !default.is_empty() {
            input = input.default(default.to_string());
        }
        match input.interact_text() {
            Ok(v) => Ok(v),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Default implementation of `ConfirmPrompter` using `dialoguer::Confirm`.
pub struct DialoguerConfirmPrompter;

impl ConfirmPrompter for DialoguerConfirmPrompter {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, String> {
        let theme = ColorfulTheme::default();
        let confirm = Confirm::with_theme(&theme)
            .with_prompt(prompt)
            .default(default);
        match confirm.interact() {
            Ok(v) => Ok(v),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Prompt the user for an input string, including context from a repository name.
///
/// Constructs a prompt of the form `"New author email for my-repo"`, using
/// the provided default if input is empty.
pub fn ask<P: StringPrompter>(
    prompter: &mut P,
    label: &str,
    repo_name: &str,
    default_value: &str,
) -> Result<String, String> {
    let prompt = format!("{} for {}", label, repo_name);
    prompter.prompt(&prompt, default_value)
}

/// Ask the user to confirm whether to begin rewriting commit history.
pub fn confirm_start<P: ConfirmPrompter>(prompter: &mut P) -> Result<bool, String> {
    let prompt = "Start now? (rewrites every branch and tag of the working clone)";
    prompter.confirm(prompt, true)
}

/// Formats a commit timestamp in its recorded timezone.
pub fn format_timestamp(ts: &Timestamp) -> String {
    let offset = FixedOffset::east_opt(ts.offset_minutes * 60);
    let utc = DateTime::from_timestamp(ts.seconds, 0);
    match (offset, utc) {
        (Some(offset), Some(utc)) => utc
            .with_timezone(&offset)
            .format("%Y-%m-%d %H:%M:%S %z")
            .to_string(),
        _ => ts.to_string(),
    }
}

/// Lines shown for one candidate commit.
fn candidate_lines(candidate: &Candidate, position: usize, total: usize) -> Vec<String> {
    let id = candidate.id.to_string();
    let short = &id[..id.len().min(10)];
    vec![
        format!(
            "{} {}",
            style(format!("[{}/{}]", position, total)).cyan().bold(),
            style(short).yellow()
        ),
        format!("  Author:    {}", candidate.author),
        format!("  Committer: {}", candidate.committer),
        format!("  Date:      {}", format_timestamp(&candidate.authored)),
        format!("  Subject:   {}", candidate.subject),
    ]
}

/// Terminal-backed [`DecisionPrompter`]: one keypress per commit.
pub struct TerminalDecisionPrompter {
    term: Term,
}

impl TerminalDecisionPrompter {
    pub fn new() -> Self {
        TerminalDecisionPrompter {
            term: Term::stderr(),
        }
    }
}

impl Default for TerminalDecisionPrompter {
    fn default() -> Self {
        TerminalDecisionPrompter::new()
    }
}

impl DecisionPrompter for TerminalDecisionPrompter {
    fn choose(&mut self, candidate: &Candidate, position: usize, total: usize) -> Result<char, PromptError> {
        let io = |e: std::io::Error| PromptError::Input(e.to_string());
        self.term.write_line("").map_err(io)?;
        for line in candidate_lines(candidate, position, total) {
            self.term.write_line(&line).map_err(io)?;
        }
        self.term
            .write_str(&format!(
                "{} ",
                style("[E]dit  [A]pply default  [S]kip  [D]efault for all remaining  [Q]uit ›").bold()
            ))
            .map_err(io)?;
        let key = self.term.read_char().map_err(io)?;
        self.term.write_line(&key.to_string()).map_err(io)?;
        Ok(key)
    }

    fn custom_rewrite(&mut self, _candidate: &Candidate, default: &Identity) -> Result<CustomRewrite, PromptError> {
        let mut strings = DialoguerStringPrompter;
        let name = strings
            .prompt("Author name", &default.name.to_string())
            .map_err(PromptError::Input)?;
        let email = strings
            .prompt("Author email", &default.email.to_string())
            .map_err(PromptError::Input)?;

        let theme = ColorfulTheme::default();
        let message: String = Input::with_theme(&theme)
            .with_prompt("New message (leave empty to keep)")
            .allow_empty(true)
            .interact_text()
            .map_err(|e| PromptError::Input(e.to_string()))?;

        Ok(CustomRewrite {
            identity: Identity::new(name.trim(), email.trim()),
            message: if message.trim().is_empty() {
                None
            } else {
                Some(format!("{}\n", message.trim_end()).into())
            },
        })
    }

    fn invalid_key(&mut self, key: char) {
        let _ = self.term.write_line(
            &style(format!("'{}' is not one of E/A/S/D/Q", key))
                .red()
                .to_string(),
        );
    }
}
