use std::path::Path;

use anyhow::{Context, Result};
use gateway_protocol::GatewayConfig;

/// Load configuration from a TOML file, apply the environment overlay, and
/// validate. Falls back to defaults if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<GatewayConfig> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: GatewayConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse config TOML")?;
        tracing::info!("Loaded config from {}", path.display());
        config
    } else {
        tracing::warn!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        GatewayConfig::default()
    };

    config.apply_env_overrides();
    Ok(config)
}
