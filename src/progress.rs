//! Terminal progress and confirmation for engine passes.

use colored::Colorize;
use declarative::{Action, Address, ApplyResult, ConfirmCallback, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

/// A progress bar over the steps of a pass, with one line per finished step.
pub struct StepProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl StepProgress {
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn line(&self, msg: String) {
        match &self.bar {
            Some(bar) => bar.println(msg),
            None => println!("{msg}"),
        }
    }
}

impl ProgressCallback for StepProgress {
    fn on_start(&mut self, total: usize) {
        let bar = if self.quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        self.bar = Some(bar);
    }

    fn on_step_start(&mut self, address: &Address, action: &Action) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{action} {address}"));
        }
    }

    fn on_step_complete(&mut self, address: &Address, result: &ApplyResult) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
        if self.quiet {
            return;
        }
        let line = match result {
            ApplyResult::NoChange => return,
            ApplyResult::Created => format!("  {} {address} created", "+".green()),
            ApplyResult::Updated => format!("  {} {address} updated", "~".yellow()),
            ApplyResult::Replaced => format!("  {} {address} replaced", "±".yellow()),
            ApplyResult::Destroyed => format!("  {} {address} destroyed", "-".red()),
            ApplyResult::AlreadyAbsent => {
                format!("  {} {address} {}", "-".dimmed(), "already gone".dimmed())
            }
            ApplyResult::Released => {
                format!("  {} {address} {}", "-".dimmed(), "still in use, kept".dimmed())
            }
            ApplyResult::Failed { error } => format!("  {} {address}: {error}", "✗".red()),
        };
        self.line(line);
    }

    fn on_complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Asks on the terminal.
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> anyhow::Result<bool> {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_progress_runs_hidden() {
        let mut progress = StepProgress::new(true);
        let address = Address::new("queue", "jobs");
        progress.on_start(2);
        progress.on_step_start(&address, &Action::Create);
        progress.on_step_complete(&address, &ApplyResult::Created);
        assert_eq!(progress.bar.as_ref().map(ProgressBar::position), Some(1));
        progress.on_complete();
        assert!(progress.bar.is_none());
    }
}
