//! Interactive confirmation for rollbacks.
//!
//! Uses dialoguer for terminal prompts.

use std::io::{self, Write};
use std::sync::Mutex;

use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};

use selsync_core::orchestrator::Prompter;
use selsync_core::types::ChangeRecord;

/// Asks on the terminal, or answers yes when `--yes` was given.
pub struct TerminalPrompter<W: Write = io::Stdout> {
    assume_yes: bool,
    writer: Mutex<W>,
    theme: ColorfulTheme,
}

impl TerminalPrompter<io::Stdout> {
    pub fn new(assume_yes: bool) -> Self {
        Self::with_writer(assume_yes, io::stdout())
    }
}

impl<W: Write> TerminalPrompter<W> {
    /// Create a prompter with a custom writer (for testing).
    pub fn with_writer(assume_yes: bool, writer: W) -> Self {
        Self {
            assume_yes,
            writer: Mutex::new(writer),
            theme: ColorfulTheme::default(),
        }
    }

    /// Print what a rollback of `record` will touch.
    pub fn describe(&self, record: &ChangeRecord) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("prompt writer poisoned"))?;
        writeln!(writer)?;
        writeln!(writer, "{}", style("Rollback").bold())?;
        writeln!(
            writer,
            "  Resource: {}",
            style(&record.resource_id).cyan()
        )?;
        writeln!(
            writer,
            "  Replicas: {} -> {}",
            record.new_value,
            style(record.previous_value).green()
        )?;
        writeln!(
            writer,
            "  Artifact: {} {}",
            record.published_artifact_id,
            style(&record.published_artifact_version).red()
        )?;
        if let Some(commit) = &record.change_commit {
            writeln!(writer, "  Commit:   {}", commit)?;
        }
        writeln!(writer)?;
        Ok(())
    }
}

impl<W: Write + Send> Prompter for TerminalPrompter<W> {
    fn confirm(&self, question: &str) -> anyhow::Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        let confirmed = Confirm::with_theme(&self.theme)
            .with_prompt(question)
            .default(true)
            .interact()?;
        Ok(confirmed)
    }
}
