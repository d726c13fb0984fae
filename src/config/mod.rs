mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;
    expand_paths(&mut config);

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./mp3ify.toml",
        "./config.toml",
        "~/.config/mp3ify/config.toml",
        "/etc/mp3ify/config.toml",
    ];

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

fn expand_paths(config: &mut Config) {
    let data_dir = config.storage.data_dir.to_string_lossy().into_owned();
    config.storage.data_dir = shellexpand::tilde(&data_dir).into_owned().into();
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.converter.program.trim().is_empty() {
        anyhow::bail!("Converter program cannot be empty");
    }

    if !config.converter.args.iter().any(|a| a.contains("{source}")) {
        anyhow::bail!("Converter args must reference {{source}}");
    }

    if config.engine.subscriber_buffer == 0 {
        anyhow::bail!("Engine subscriber_buffer must be greater than 0");
    }

    if config.engine.max_concurrent == 0 {
        tracing::warn!("Engine max_concurrent is 0, conversions are unbounded");
    }

    Ok(())
}
