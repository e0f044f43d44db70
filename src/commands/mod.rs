//! CLI command handlers.

mod config;
mod run;

pub use config::{default_config_json, run_check_config, run_default_config};
pub use run::run_selfheal;
