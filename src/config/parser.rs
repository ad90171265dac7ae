use crate::config::types::Config;
use crate::config::validation::{validate, validate_process_definition, validate_step_definition};
use crate::process::{ProcessDefinition, StepDefinition};
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is logged at startup so runs can be matched to the configuration
/// they were started with.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Loads a crawl process definition (seeds and steps) from a TOML file
pub fn load_process_definition(path: &Path) -> Result<ProcessDefinition, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let definition: ProcessDefinition = toml::from_str(&content)?;
    validate_process_definition(&definition)?;
    Ok(definition)
}

/// Loads a single step (new limits for an existing process) from a TOML file
pub fn load_step_definition(path: &Path) -> Result<StepDefinition, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let step: StepDefinition = toml::from_str(&content)?;
    validate_step_definition(&step)?;
    Ok(step)
}
