mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./mkv-extract.toml", "~/.config/mkv-extract/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.tools.timeout_secs == 0 {
        anyhow::bail!("tools.timeout_secs cannot be 0");
    }
    if config.tools.export_timeout_secs == 0 {
        anyhow::bail!("tools.export_timeout_secs cannot be 0");
    }

    for (name, path) in [
        ("ffmpeg_path", &config.tools.ffmpeg_path),
        ("ffprobe_path", &config.tools.ffprobe_path),
    ] {
        if let Some(p) = path {
            if !p.exists() {
                tracing::warn!("tools.{} does not exist: {:?}", name, p);
            }
        }
    }

    if config.extract.threads == 0 {
        anyhow::bail!("extract.threads cannot be 0");
    }

    if config.verify.chunk_size == 0 {
        anyhow::bail!("verify.chunk_size cannot be 0");
    }
    if config.verify.fps.is_nan() || config.verify.fps <= 0.0 {
        anyhow::bail!("verify.fps must be positive, got {}", config.verify.fps);
    }
    config
        .verify
        .to_options(false)
        .context("Invalid verify.pixel_format")?;

    Ok(())
}
