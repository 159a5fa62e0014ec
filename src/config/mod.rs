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

    let default_paths = [
        "./config.toml",
        "./anistream.toml",
        "~/.config/anistream/config.toml",
        "/etc/anistream/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.packaging.segment_duration_secs == 0 {
        anyhow::bail!("Segment duration cannot be 0");
    }

    if config.storage.retention_minutes == 0 {
        anyhow::bail!("Retention window cannot be 0 minutes");
    }

    for preset in &config.packaging.ladder {
        if preset.name.is_empty() {
            anyhow::bail!("Quality preset has an empty name");
        }
        if preset.width == 0 || preset.height == 0 {
            anyhow::bail!("Quality preset '{}' has a zero dimension", preset.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_segment_duration() {
        let mut config = Config::default();
        config.packaging.segment_duration_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_unnamed_preset() {
        let mut config = Config::default();
        config.packaging.ladder[0].name.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(validate_config(&Config::default()).is_ok());
    }
}
