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
//! Configuration schema
//!
//! Every section falls back to its defaults, so an empty file is a valid
//! configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Where and how the SQLite store is opened
    pub storage: StorageConfig,

    /// Document engine behaviour
    pub engine: EngineConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// SQLite store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file
    pub path: PathBuf,

    /// Ignore `path` and keep everything in memory
    pub in_memory: bool,

    /// Upper bound on pooled connections
    pub max_connections: u32,

    /// How long a connection waits on a locked database (milliseconds)
    pub busy_timeout_ms: u64,

    /// Create the database file when it does not exist
    pub create_if_missing: bool,
}

impl StorageConfig {
    /// Busy timeout as a [`Duration`]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: PathBuf::from(DEFAULT_STORAGE_PATH),
            in_memory: false,
            max_connections: 5,
            busy_timeout_ms: 5000,
            create_if_missing: true,
        }
    }
}

/// Document engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Content type recorded for attachments uploaded without one
    pub default_attachment_content_type: String,

    /// Generate ids for CreateDoc as simple uuid v4 hex
    pub uuid_ids: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_attachment_content_type: "application/octet-stream".to_string(),
            uuid_ids: true,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level or filter directive (`info`, `couchsql_revtree=debug`, ...)
    pub level: String,

    /// Output format: `pretty`, `compact` or `json`
    pub format: String,

    /// Log every SQL statement
    pub sql_queries: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
            sql_queries: false,
        }
    }
}

/// Default database file
pub const DEFAULT_STORAGE_PATH: &str = "couchsql.db";

/// Accepted values for `logging.format`
pub const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Accepted plain values for `logging.level`
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
