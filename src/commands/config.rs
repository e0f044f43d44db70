//! `check-config` and `default-config` handlers.

use std::path::Path;

use tracing::info;

use crate::cli::load_config;
use crate::config::HealingConfig;

/// Load, override and validate `path`, then print a short summary.
///
/// # Errors
/// Returns the first configuration problem found.
pub fn run_check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(Some(path))?;
    info!(path = %path.display(), "Configuration is valid");
    println!(
        "{}: OK ({} components, {} rules, {} strategies, max {} concurrent actions)",
        path.display(),
        config.components.len(),
        config.rules.len(),
        config.strategies.len(),
        config.max_concurrent_actions
    );
    Ok(())
}

/// Print the built-in configuration as pretty JSON.
///
/// # Errors
/// Returns error if serialization fails.
pub fn run_default_config() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", default_config_json()?);
    Ok(())
}

pub fn default_config_json() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&HealingConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_check() {
        let json = default_config_json().unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();
        assert!(run_check_config(file.path()).is_ok());
    }
}
