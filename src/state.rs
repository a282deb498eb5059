//! Tracked state persistence.
//!
//! The engine's [`TrackedState`] is stored as TOML, by default at
//! `~/.local/state/warren/state.toml`.

use anyhow::{Context, Result};
use declarative::TrackedState;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the state directory path (~/.local/state/warren)
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join("warren"))
}

/// Default state file path
pub fn default_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("state.toml"))
}

/// Resolve the `--state` flag, expanding `~`.
pub fn resolve(flag: Option<&str>) -> Result<PathBuf> {
    match flag {
        Some(path) => Ok(PathBuf::from(shellexpand::tilde(path).as_ref())),
        None => default_path(),
    }
}

/// Load state from disk, or return empty state if the file doesn't exist
pub fn load(path: &Path) -> Result<TrackedState> {
    if !path.exists() {
        log::debug!("State file {} does not exist, starting empty", path.display());
        return Ok(TrackedState::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;

    let state: TrackedState = toml::from_str(&content)
        .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

    log::debug!("Loaded {} tracked instance(s) from {}", state.len(), path.display());
    Ok(state)
}

/// Stamp and save state to disk
pub fn save(path: &Path, state: &mut TrackedState) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
    }

    state.touch();
    let content = toml::to_string_pretty(state).context("Failed to serialize state to TOML")?;

    fs::write(path, &content)
        .with_context(|| format!("Failed to write state file: {}", path.display()))?;

    log::debug!("Saved state to {}", path.display());
    Ok(())
}
