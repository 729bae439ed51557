//! Configuration management commands

use anyhow::bail;
use ccda_core::{ConfigLoader, EngineConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{ConfigFormat, Status};

/// Config init command implementation
pub fn init_command(format: ConfigFormat, force: bool) -> anyhow::Result<Status> {
    debug!("Initializing configuration file with format: {:?}", format);

    let filename = match format {
        ConfigFormat::Toml => "ccda.toml",
        ConfigFormat::Json => ".ccdarc.json",
    };
    let config_path = PathBuf::from(filename);

    if config_path.exists() && !force {
        bail!("configuration file '{filename}' already exists, use --force to overwrite");
    }

    let config = EngineConfig::default();
    let content = match format {
        ConfigFormat::Toml => config.to_toml_string()?,
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
    };
    fs::write(&config_path, content)?;

    println!("Created configuration file: {filename}");
    Ok(Status::Success)
}

/// Config show command implementation
///
/// Prints the effective configuration as TOML.
pub fn show_command(config_path: Option<&Path>) -> anyhow::Result<Status> {
    let config = ConfigLoader::load(config_path, None)?;
    print!("{}", config.to_toml_string()?);
    Ok(Status::Success)
}
