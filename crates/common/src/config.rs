//! Build configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file
//! ([`BuildConfig::load`]), then `SANDGRAPH_*` environment variables
//! ([`BuildConfig::apply_env`]). Command-line flags are applied last by the binary.

use serde::Deserialize;
use std::path::Path;

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Identity of the traced machine (the "current host").
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub name: String,
    pub address: String,
    pub domain: String,
    pub platform: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            domain: "host".to_string(),
            platform: "Windows".to_string(),
        }
    }
}

/// Registry naming limits enforced on Key and KeyEntry vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub key_name_max: usize,
    pub entry_name_max: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            key_name_max: 255,
            entry_name_max: 16383,
        }
    }
}

/// A filtered derivative graph kept in sync with the full graph.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ViewConfig {
    pub name: String,
    /// Vertex kind names admitted into the view (e.g. `"Socket"`, `"Key"`).
    pub kinds: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub host: HostConfig,
    pub limits: Limits,
    pub views: Vec<ViewConfig>,
}

impl BuildConfig {
    /// Reads a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `SANDGRAPH_HOST_NAME`, `SANDGRAPH_HOST_ADDRESS` and
    /// `SANDGRAPH_HOST_PLATFORM` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Same as [`apply_env`](Self::apply_env) with an explicit lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("SANDGRAPH_HOST_NAME") {
            self.host.name = name;
        }
        if let Some(address) = lookup("SANDGRAPH_HOST_ADDRESS") {
            self.host.address = address;
        }
        if let Some(platform) = lookup("SANDGRAPH_HOST_PLATFORM") {
            self.host.platform = platform;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = BuildConfig::default();
        assert_eq!(config.host.domain, "host");
        assert_eq!(config.host.platform, "Windows");
        assert_eq!(config.limits.key_name_max, 255);
        assert_eq!(config.limits.entry_name_max, 16383);
        assert!(config.views.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BuildConfig::from_toml_str(
            r#"
            [host]
            name = "SANDBOX-07"
            address = "192.168.56.101"

            [[views]]
            name = "network"
            kinds = ["Socket", "Connection", "Host"]
            "#,
        )
        .unwrap();
        assert_eq!(config.host.name, "SANDBOX-07");
        assert_eq!(config.host.domain, "host");
        assert_eq!(config.limits, Limits::default());
        assert_eq!(config.views.len(), 1);
        assert_eq!(config.views[0].kinds, vec!["Socket", "Connection", "Host"]);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            BuildConfig::from_toml_str("[host\nname ="),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SANDGRAPH_HOST_NAME", "WIN-LAB"),
            ("SANDGRAPH_HOST_PLATFORM", "Windows 10"),
        ]
        .into_iter()
        .collect();
        let mut config = BuildConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.host.name, "WIN-LAB");
        assert_eq!(config.host.platform, "Windows 10");
        assert_eq!(config.host.address, "");
    }

    #[test]
    fn test_load_missing_file() {
        let result = BuildConfig::load(Path::new("/this/does/not/exist/sandgraph.toml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
