//! # Configuration Module
//!
//! One YAML file configures one whiteboard: its runtime endpoint, batching,
//! the default application and the providers it serves from the start.
//!
//! ```yaml
//! name: main
//! port: 8080
//! context_path: /api
//! batch_window_ms: 500
//! reload_timeout_ms: 5000
//! status_path: /whiteboard/status
//! properties:
//!   tenant: blue
//! providers:
//!   - id: 10
//!     path: /hello
//!     properties:
//!       whiteboard.resource: true
//!     methods:
//!       - verb: GET
//!         body: hello
//! ```
//!
//! ## Environment Variables
//!
//! Applied after the file is parsed, so they win over it:
//!
//! | Variable | Field |
//! |---|---|
//! | `WHITEBOARD_NAME` | `name` |
//! | `WHITEBOARD_HOST` | `host` |
//! | `WHITEBOARD_PORT` | `port` |
//! | `WHITEBOARD_CONTEXT_PATH` | `context_path` |
//! | `WHITEBOARD_BATCH_WINDOW_MS` | `batch_window_ms` |
//! | `WHITEBOARD_RELOAD_TIMEOUT_MS` | `reload_timeout_ms` |
//!
//! A missing name or port is fatal for that whiteboard only.

use crate::declared::ProviderDecl;
use crate::properties::Properties;
use crate::runtime::RuntimeSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Why a configuration cannot activate a whiteboard.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("whiteboard name is missing")]
    MissingName,
    #[error("whiteboard port is missing")]
    MissingPort,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value `{value}` for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("service id 0 is reserved for the built-in default application")]
    ReservedServiceId,
    #[error("service id {0} is declared more than once")]
    DuplicateServiceId(i64),
    #[error("provider {id}: unknown HTTP verb `{verb}`")]
    InvalidVerb { id: i64, verb: String },
}

/// Configuration of one whiteboard.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WhiteboardConfig {
    pub name: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub context_path: String,
    pub batch_window_ms: u64,
    pub reload_timeout_ms: u64,
    /// Register the built-in `.default` application
    pub default_application: bool,
    /// Path serving the status document, e.g. `/whiteboard/status`
    pub status_path: Option<String>,
    /// Extra runtime properties matched by `whiteboard.target`
    pub properties: Properties,
    pub providers: Vec<ProviderDecl>,
}

impl Default for WhiteboardConfig {
    fn default() -> Self {
        Self {
            name: None,
            host: "0.0.0.0".to_string(),
            port: None,
            context_path: "/".to_string(),
            batch_window_ms: 500,
            reload_timeout_ms: 5000,
            default_application: true,
            status_path: None,
            properties: Properties::new(),
            providers: Vec::new(),
        }
    }
}

impl WhiteboardConfig {
    /// Read `path`, apply the environment and validate.
    ///
    /// # Errors
    ///
    /// I/O and parse failures, bad environment values, and anything
    /// [`validate`](Self::validate) rejects.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::parse_file(path)?;
        config.apply_env(|var| env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse `path` without applying the environment or validating.
    ///
    /// # Errors
    ///
    /// I/O or YAML failures.
    pub fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `lookup` (normally the process environment).
    ///
    /// # Errors
    ///
    /// A numeric variable that does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("WHITEBOARD_NAME") {
            self.name = Some(name);
        }
        if let Some(host) = lookup("WHITEBOARD_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("WHITEBOARD_PORT") {
            self.port = Some(parse_env("WHITEBOARD_PORT", &port)?);
        }
        if let Some(context_path) = lookup("WHITEBOARD_CONTEXT_PATH") {
            self.context_path = context_path;
        }
        if let Some(ms) = lookup("WHITEBOARD_BATCH_WINDOW_MS") {
            self.batch_window_ms = parse_env("WHITEBOARD_BATCH_WINDOW_MS", &ms)?;
        }
        if let Some(ms) = lookup("WHITEBOARD_RELOAD_TIMEOUT_MS") {
            self.reload_timeout_ms = parse_env("WHITEBOARD_RELOAD_TIMEOUT_MS", &ms)?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Missing name or port, and declared providers that can never be
    /// registered (reserved or duplicate ids, unknown verbs).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            return Err(ConfigError::MissingName);
        }
        if self.port.is_none() {
            return Err(ConfigError::MissingPort);
        }
        validate_providers(&self.providers)
    }

    /// # Errors
    ///
    /// [`ConfigError::MissingName`] or [`ConfigError::MissingPort`].
    pub fn runtime_settings(&self) -> Result<RuntimeSettings, ConfigError> {
        let name = self.name.as_deref().ok_or(ConfigError::MissingName)?;
        let port = self.port.ok_or(ConfigError::MissingPort)?;
        let mut settings = RuntimeSettings::new(name, port);
        settings.host = self.host.clone();
        settings.context_path = self.context_path.clone();
        settings.reload_timeout = Duration::from_millis(self.reload_timeout_ms);
        settings.properties = self.properties.clone();
        Ok(settings)
    }

    #[must_use]
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// `host:port` to bind.
    #[must_use]
    pub fn bind_address(&self) -> Option<String> {
        self.port.map(|port| format!("{}:{port}", self.host))
    }
}

/// Checks shared with provider files reloaded at runtime.
///
/// # Errors
///
/// Reserved or duplicate ids, unknown verbs.
pub fn validate_providers(providers: &[ProviderDecl]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for decl in providers {
        if decl.id == 0 {
            return Err(ConfigError::ReservedServiceId);
        }
        if !seen.insert(decl.id) {
            return Err(ConfigError::DuplicateServiceId(decl.id));
        }
        if let Some(bad) = decl.methods.iter().find(|m| m.method().is_none()) {
            return Err(ConfigError::InvalidVerb {
                id: decl.id,
                verb: bad.verb.clone(),
            });
        }
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn parse(yaml: &str) -> WhiteboardConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("name: main\nport: 8080\n");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.context_path, "/");
        assert_eq!(config.batch_window(), Duration::from_millis(500));
        assert_eq!(config.reload_timeout_ms, 5000);
        assert!(config.default_application);
        assert!(config.status_path.is_none());
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address().as_deref(), Some("0.0.0.0:8080"));
    }

    #[test]
    fn test_missing_name_and_port() {
        let config = parse("port: 8080\n");
        assert!(matches!(config.validate(), Err(ConfigError::MissingName)));
        let config = parse("name: main\n");
        assert!(matches!(config.validate(), Err(ConfigError::MissingPort)));
        assert!(matches!(
            config.runtime_settings(),
            Err(ConfigError::MissingPort)
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = parse("name: main\nport: 8080\n");
        let env: HashMap<&str, &str> = [
            ("WHITEBOARD_NAME", "other"),
            ("WHITEBOARD_PORT", "9090"),
            ("WHITEBOARD_CONTEXT_PATH", "/api"),
            ("WHITEBOARD_BATCH_WINDOW_MS", "0"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|k| env.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.name.as_deref(), Some("other"));
        assert_eq!(config.port, Some(9090));
        assert_eq!(config.batch_window(), Duration::ZERO);

        let settings = config.runtime_settings().unwrap();
        assert_eq!(settings.name, "other");
        assert_eq!(settings.context_path, "/api");
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = WhiteboardConfig::default();
        let err = config
            .apply_env(|k| (k == "WHITEBOARD_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "WHITEBOARD_PORT", .. }));
    }

    #[test]
    fn test_provider_checks() {
        let config = parse(
            r#"
name: main
port: 8080
providers:
  - id: 0
"#,
        );
        assert!(matches!(config.validate(), Err(ConfigError::ReservedServiceId)));

        let config = parse(
            r#"
name: main
port: 8080
providers:
  - id: 4
  - id: 4
"#,
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateServiceId(4))
        ));

        let config = parse(
            r#"
name: main
port: 8080
providers:
  - id: 4
    methods:
      - verb: "BAD VERB"
"#,
        );
        assert!(matches!(config.validate(), Err(ConfigError::InvalidVerb { id: 4, .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "name: filed\nport: 7070\nstatus_path: /status\nproperties:\n  tenant: blue"
        )
        .unwrap();
        let config = WhiteboardConfig::parse_file(file.path()).unwrap();
        assert_eq!(config.name.as_deref(), Some("filed"));
        assert_eq!(config.status_path.as_deref(), Some("/status"));
        assert_eq!(config.properties.get_str("tenant"), Some("blue"));

        let missing = WhiteboardConfig::parse_file(Path::new("/nonexistent/whiteboard.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
