//! Progress and confirmation traits
//!
//! These let the engine report progress and ask for confirmation without
//! depending on a terminal UI.

use crate::planner::Action;
use crate::types::{Address, ApplyResult};
use anyhow::Result;

/// Progress callback for execution operations
pub trait ProgressCallback: Send {
    /// Called once before the first step with the number of steps
    fn on_start(&mut self, total: usize);

    /// Called when a step starts
    fn on_step_start(&mut self, address: &Address, action: &Action);

    /// Called when a step completes, successfully or not
    fn on_step_complete(&mut self, address: &Address, result: &ApplyResult);

    /// Called after the last step, or after the step that failed
    fn on_complete(&mut self);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&mut self, _total: usize) {}
    fn on_step_start(&mut self, _address: &Address, _action: &Action) {}
    fn on_step_complete(&mut self, _address: &Address, _result: &ApplyResult) {}
    fn on_complete(&mut self) {}
}

/// Progress callback that writes to the `log` facade.
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_start(&mut self, total: usize) {
        log::info!("Executing {total} step(s)");
    }

    fn on_step_start(&mut self, address: &Address, action: &Action) {
        log::debug!("{address}: {action}");
    }

    fn on_step_complete(&mut self, address: &Address, result: &ApplyResult) {
        match result {
            ApplyResult::Failed { error } => log::error!("{address}: {error}"),
            other => log::info!("{address}: {other:?}"),
        }
    }

    fn on_complete(&mut self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}
