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
use crate::schema::*;

/// Validator for configuration settings
pub trait Validator {
    fn validate(&self) -> ConfigResult<()>;
}

impl Validator for Config {
    fn validate(&self) -> ConfigResult<()> {
        self.storage.validate()?;
        self.engine.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl Validator for StorageConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !self.in_memory && self.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired("storage.path".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::invalid_value(
                "storage.max_connections",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

impl Validator for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        let content_type = &self.default_attachment_content_type;
        match content_type.split_once('/') {
            Some((kind, sub)) if !kind.is_empty() && !sub.is_empty() => Ok(()),
            _ => Err(ConfigError::invalid_value(
                "engine.default_attachment_content_type",
                format!("expected a MIME type like text/plain, got '{}'", content_type),
            )),
        }
    }
}

impl Validator for LoggingConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !LOG_FORMATS.contains(&self.format.as_str()) {
            return Err(ConfigError::invalid_value(
                "logging.format",
                format!("must be one of: {}", LOG_FORMATS.join(", ")),
            ));
        }

        if self.level.trim().is_empty() {
            return Err(ConfigError::MissingRequired("logging.level".to_string()));
        }

        // Filter directives are checked when the subscriber is built
        let is_directive = self.level.contains('=') || self.level.contains(',');
        if !is_directive && !LOG_LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::invalid_value(
                "logging.level",
                format!("must be one of: {}", LOG_LEVELS.join(", ")),
            ));
        }

        Ok(())
    }
}
