// CouchSQL - CouchDB document revision trees on SQL
// Copyright (C) 2025 CouchSQL Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
use crate::error::{ConfigError, ConfigResult};
use crate::schema::Config;
use crate::validation::Validator;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::{debug, info};

/// Environment variables consulted by [`ConfigLoader::apply_env_overrides`]
pub const ENV_STORAGE_PATH: &str = "COUCHSQL_STORAGE_PATH";
pub const ENV_IN_MEMORY: &str = "COUCHSQL_IN_MEMORY";
pub const ENV_MAX_CONNECTIONS: &str = "COUCHSQL_MAX_CONNECTIONS";
pub const ENV_BUSY_TIMEOUT_MS: &str = "COUCHSQL_BUSY_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "COUCHSQL_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "COUCHSQL_LOG_FORMAT";
pub const ENV_SQL_QUERIES: &str = "COUCHSQL_SQL_QUERIES";

/// Configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => Err(ConfigError::InvalidPath(path.to_path_buf())),
        }
    }

    /// Get format name as string
    pub fn name(&self) -> &'static str {
        match self {
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Json => "JSON",
        }
    }
}

/// Configuration loader
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    validate: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        ConfigLoader { validate: true }
    }

    /// Create a loader without validation
    pub fn without_validation() -> Self {
        ConfigLoader { validate: false }
    }

    /// Load configuration from a file
    pub async fn load_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<Config> {
        let value = self.read_value(path.as_ref()).await?;
        self.finish(serde_json::from_value(value)?)
    }

    /// Load configuration from a string
    pub fn load_from_string(&self, content: &str, format: ConfigFormat) -> ConfigResult<Config> {
        let config = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        debug!("Configuration loaded from {}", format.name());
        self.finish(config)
    }

    /// Load configuration with environment variable overrides
    pub async fn load_with_overrides<P: AsRef<Path>>(&self, path: P) -> ConfigResult<Config> {
        let mut config = self.load_file(path).await?;
        self.apply_env_overrides(&mut config)?;
        self.finish(config)
    }

    /// Load `path` when given, defaults otherwise, then apply the environment
    pub async fn load_optional(&self, path: Option<&Path>) -> ConfigResult<Config> {
        match path {
            Some(path) => self.load_with_overrides(path).await,
            None => {
                let mut config = Config::default();
                self.apply_env_overrides(&mut config)?;
                self.finish(config)
            }
        }
    }

    /// Merge several files; later files win key by key
    pub async fn load_and_merge<P: AsRef<Path>>(&self, paths: &[P]) -> ConfigResult<Config> {
        if paths.is_empty() {
            return Err(ConfigError::MissingRequired(
                "at least one configuration file".to_string(),
            ));
        }

        let mut merged = Value::Object(serde_json::Map::new());
        for path in paths {
            let overlay = self.read_value(path.as_ref()).await?;
            merge_values(&mut merged, overlay);
        }

        self.finish(serde_json::from_value(merged)?)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&self, config: &mut Config) -> ConfigResult<()> {
        apply_overrides(config, |name| std::env::var(name).ok())
    }

    async fn read_value(&self, path: &Path) -> ConfigResult<Value> {
        debug!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).await?;

        info!(
            "Loaded {} configuration file: {}",
            format.name(),
            path.display()
        );

        let value = match format {
            ConfigFormat::Toml => serde_json::to_value(toml::from_str::<toml::Table>(&content)?)?,
            ConfigFormat::Yaml => serde_yaml::from_str(&content)?,
            ConfigFormat::Json => serde_json::from_str(&content)?,
        };
        // an empty YAML document parses as null
        Ok(match value {
            Value::Null => Value::Object(serde_json::Map::new()),
            value => value,
        })
    }

    fn finish(&self, config: Config) -> ConfigResult<Config> {
        if self.validate {
            config.validate()?;
            debug!("Configuration validated successfully");
        }
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `COUCHSQL_*` overrides read through `lookup`
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_STORAGE_PATH) {
        config.storage.path = PathBuf::from(value);
    }
    if let Some(value) = lookup(ENV_IN_MEMORY) {
        config.storage.in_memory = parse_bool(ENV_IN_MEMORY, &value)?;
    }
    if let Some(value) = lookup(ENV_MAX_CONNECTIONS) {
        config.storage.max_connections = parse_number(ENV_MAX_CONNECTIONS, &value)?;
    }
    if let Some(value) = lookup(ENV_BUSY_TIMEOUT_MS) {
        config.storage.busy_timeout_ms = parse_number(ENV_BUSY_TIMEOUT_MS, &value)?;
    }
    if let Some(value) = lookup(ENV_LOG_LEVEL) {
        config.logging.level = value;
    }
    if let Some(value) = lookup(ENV_LOG_FORMAT) {
        config.logging.format = value.to_lowercase();
    }
    if let Some(value) = lookup(ENV_SQL_QUERIES) {
        config.logging.sql_queries = parse_bool(ENV_SQL_QUERIES, &value)?;
    }
    Ok(())
}

/// Recursive object merge; non-object values are replaced
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Parse boolean from string (accepts: true, false, yes, no, 1, 0, on, off)
fn parse_bool(variable: &str, value: &str) -> ConfigResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ConfigError::env_var_parsing_error(
            variable,
            value,
            "expected 'true', 'false', 'yes', 'no', '1', '0', 'on', or 'off'",
        )),
    }
}

fn parse_number<T: FromStr>(variable: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::env_var_parsing_error(variable, value, "expected a non-negative integer")
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ConfigFormat::from_path("config.toml").unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path("config.yaml").unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path("config.yml").unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path("config.json").unwrap(), ConfigFormat::Json);
    }

    #[test]
    fn test_format_detection_error() {
        assert!(matches!(
            ConfigFormat::from_path("config.xml"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            ConfigFormat::from_path("config"),
            Err(ConfigError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_parse_bool() {
        for value in ["true", "YES", "1", "on"] {
            assert!(parse_bool("X", value).unwrap());
        }
        for value in ["false", "no", "0", "Off"] {
            assert!(!parse_bool("X", value).unwrap());
        }
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        let vars = lookup(&[
            (ENV_STORAGE_PATH, "/tmp/other.db"),
            (ENV_IN_MEMORY, "yes"),
            (ENV_MAX_CONNECTIONS, "9"),
            (ENV_BUSY_TIMEOUT_MS, "250"),
            (ENV_LOG_LEVEL, "debug"),
            (ENV_LOG_FORMAT, "JSON"),
            (ENV_SQL_QUERIES, "1"),
        ]);
        apply_overrides(&mut config, vars).unwrap();

        assert_eq!(config.storage.path, PathBuf::from("/tmp/other.db"));
        assert!(config.storage.in_memory);
        assert_eq!(config.storage.max_connections, 9);
        assert_eq!(config.storage.busy_timeout_ms, 250);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert!(config.logging.sql_queries);
    }

    #[test]
    fn test_bad_override() {
        let mut config = Config::default();
        let err = apply_overrides(&mut config, lookup(&[(ENV_MAX_CONNECTIONS, "many")]))
            .unwrap_err();
        match err {
            ConfigError::EnvVarParsingError { variable_name, .. } => {
                assert_eq!(variable_name, ENV_MAX_CONNECTIONS)
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_merge_values() {
        let mut base = serde_json::json!({"storage": {"path": "a.db", "max_connections": 2}});
        merge_values(
            &mut base,
            serde_json::json!({"storage": {"path": "b.db"}, "logging": {"level": "warn"}}),
        );
        assert_eq!(
            base,
            serde_json::json!({
                "storage": {"path": "b.db", "max_connections": 2},
                "logging": {"level": "warn"}
            })
        );
    }

    #[test]
    fn test_parse_each_format() {
        let loader = ConfigLoader::new();
        let toml = "[storage]\nmax_connections = 3\n";
        let yaml = "storage:\n  max_connections: 3\n";
        let json = r#"{"storage": {"max_connections": 3}}"#;
        for (content, format) in [
            (toml, ConfigFormat::Toml),
            (yaml, ConfigFormat::Yaml),
            (json, ConfigFormat::Json),
        ] {
            let config = loader.load_from_string(content, format).unwrap();
            assert_eq!(config.storage.max_connections, 3);
        }
    }

    #[test]
    fn test_loader_without_validation() {
        let json = r#"{"logging": {"format": "xml"}}"#;
        assert!(ConfigLoader::new()
            .load_from_string(json, ConfigFormat::Json)
            .is_err());
        assert!(ConfigLoader::without_validation()
            .load_from_string(json, ConfigFormat::Json)
            .is_ok());
    }
}
