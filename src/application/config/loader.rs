use crate::application::config::models::Config;
use crate::application::config::parser::{parse_config, parse_config_file};
use crate::application::config::validator::validate_config;
use crate::common::error::Result;
use std::path::Path;

/// Load and validate configuration from file
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let config = parse_config_file(path)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from string (useful for testing)
    pub fn load_from_str(content: &str) -> Result<Config> {
        let config = parse_config(content)?;
        validate_config(&config)?;
        Ok(config)
    }
}
