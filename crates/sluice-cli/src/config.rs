//! Configuration file support.

use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default CLI options.
    pub defaults: Defaults,
}

/// Default CLI options.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Log filter used when neither `--log-level` nor `RUST_LOG` is given.
    pub log_level: Option<String>,
    /// How often blocked workers check for cancellation, in milliseconds.
    pub poll_interval_ms: Option<u64>,
}

impl Config {
    /// Load config from the default location (~/.config/sluice/config.toml).
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Load config from a specific path.
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sluice").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let config = Config::parse(
            r#"
[defaults]
log_level = "debug"
poll_interval_ms = 10
"#,
        )
        .unwrap();

        assert_eq!(config.defaults.log_level.as_deref(), Some("debug"));
        assert_eq!(config.defaults.poll_interval_ms, Some(10));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load_from_path(Some(PathBuf::from("/nonexistent/sluice.toml")));
        assert!(config.defaults.log_level.is_none());
    }
}
