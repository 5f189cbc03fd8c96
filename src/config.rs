//! Client configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::{ClientError, ClientResult};

/// Settings applied to every session the client opens.
///
/// Loadable from TOML:
///
/// ```toml
/// timeout_secs = 10
/// charset = "ISO-8859-1"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Login and per-query timeout, in seconds.
    pub timeout_secs: u32,
    /// Character set requested for the session.
    pub charset: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            charset: "UTF-8".to_string(),
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> ClientResult<Self> {
        toml::from_str(text).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.charset, "UTF-8");
    }

    #[test]
    fn test_from_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            timeout_secs = 30
            charset = "ISO-8859-1"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.charset, "ISO-8859-1");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = ClientConfig::from_toml_str("timeout_secs = 12").unwrap();
        assert_eq!(config.timeout_secs, 12);
        assert_eq!(config.charset, "UTF-8");
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = ClientConfig::from_toml_str("timeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
