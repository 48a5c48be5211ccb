//! Path resolution for cutover
//!
//! # Environment Variables
//!
//! - `CUTOVER_CONFIG` - Override the config file path
//! - `CUTOVER_STATE_DIR` - Override the ledger journal directory
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `--config` flag
//! 2. `CUTOVER_CONFIG` environment variable
//! 3. `XDG_CONFIG_HOME/cutover/config.toml` (if set)
//! 4. `~/.config/cutover/config.toml`
//!
//! For state_dir():
//! 1. `CUTOVER_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/cutover` (if set)
//! 3. `~/.local/state/cutover`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config file override
pub const ENV_CONFIG: &str = "CUTOVER_CONFIG";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "CUTOVER_STATE_DIR";

/// Resolve the config file path
pub fn config_file(flag: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(expand(path));
    }

    if let Ok(path) = std::env::var(ENV_CONFIG) {
        let path = expand(&path);
        log::debug!("Using config from {ENV_CONFIG}: {}", path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("cutover").join("config.toml");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("cutover").join("config.toml"))
}

/// Default directory for ledger journals
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {ENV_STATE_DIR}: {}", path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("cutover");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join("cutover"))
}

/// Expand `~` and environment variables in a path.
///
/// Unknown variables are left as written.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_flag_wins() {
        let path = config_file(Some("/etc/cutover/prod.toml")).unwrap();
        assert_eq!(path, PathBuf::from("/etc/cutover/prod.toml"));
    }

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/cutover/journal");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("cutover").join("journal"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/var/lib/cutover"), PathBuf::from("/var/lib/cutover"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$CUTOVER_NONEXISTENT_12345/file");
        assert_eq!(result, PathBuf::from("/path/$CUTOVER_NONEXISTENT_12345/file"));
    }
}
