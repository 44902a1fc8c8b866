//! # Server Configuration
//!
//! TOML configuration for the HTTP server, with environment-variable
//! overrides so deployments can tweak a single knob without editing files.
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 8080
//! rate_limit = 100
//! cors_origins = "https://app.example.org,https://ops.example.org"
//! ```
//!
//! Environment overrides: `KAIROS_RATE_LIMIT`, `KAIROS_CORS_ORIGINS`.

use kairos_core::KairosError;
use serde::Deserialize;
use std::path::Path;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_rate_limit() -> u32 {
    100
}

/// Server settings, all optional in the file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Requests per second; 0 disables rate limiting.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    /// Comma-separated allowed origins, or "*" for all. Unset means
    /// localhost only.
    #[serde(default)]
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rate_limit: default_rate_limit(),
            cors_origins: None,
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, KairosError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| KairosError::Resource(format!("read config {:?}: {}", path, e)))?;
        toml::from_str(&contents)
            .map_err(|e| KairosError::Serialization(format!("parse config {:?}: {}", path, e)))
    }

    /// Apply environment-variable overrides on top of the file values.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(limit) = std::env::var("KAIROS_RATE_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.rate_limit = limit;
        }
        if let Ok(origins) = std::env::var("KAIROS_CORS_ORIGINS") {
            self.cors_origins = Some(origins);
        }
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config: ServerConfig = toml::from_str("port = 9000").expect("parse");
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.rate_limit, 100);
        assert_eq!(config.cors_origins, None);
    }

    #[test]
    fn full_file_parses() {
        let config: ServerConfig = toml::from_str(
            r#"
            host = "0.0.0.0"
            port = 8443
            rate_limit = 25
            cors_origins = "*"
            "#,
        )
        .expect("parse");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8443);
        assert_eq!(config.rate_limit, 25);
        assert_eq!(config.cors_origins.as_deref(), Some("*"));
    }
}
