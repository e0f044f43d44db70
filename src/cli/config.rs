//! CLI configuration bridging parsed arguments to [`HealingConfig`].

use std::path::{Path, PathBuf};

use crate::config::{ConfigError, HealingConfig};

/// Arguments of `selfheal run` after parsing.
#[derive(Debug, Clone)]
pub struct RunCliConfig {
    pub config_path: Option<PathBuf>,
    pub health_port: u16,
    pub sandbox: bool,
    pub journal: Option<PathBuf>,
}

/// File (or defaults), then `SELFHEAL_*` environment overrides, then validation.
///
/// # Errors
/// Returns `ConfigError` if the file cannot be read or parsed, an override is
/// malformed, or the result fails validation.
pub fn load_config(path: Option<&Path>) -> Result<HealingConfig, ConfigError> {
    let mut config = match path {
        Some(p) => HealingConfig::from_json_file(p)?,
        None => HealingConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}
