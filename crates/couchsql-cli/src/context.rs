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

//! Store access for CLI commands
//!
//! Resolves the configuration, opens the SQLite store it names and hands out
//! database handles.

use anyhow::{Context, Result};
use couchsql_config::{Config, ConfigLoader};
use couchsql_revtree::Database;
use couchsql_storage::{Store, StoreOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything a command needs to reach the store
pub struct CliContext {
    pub config: Config,
    pub store: Store,
}

impl CliContext {
    /// Open the store described by `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let options = store_options(&config);
        debug!(path = ?options.path, "opening store");
        let store = Store::open(options)
            .await
            .with_context(|| format!("Failed to open store {}", config.storage.path.display()))?;
        Ok(CliContext { config, store })
    }

    /// Open an existing database.
    pub async fn database(&self, name: &str) -> Result<Database> {
        let db = Database::open(&self.store, name).await?;
        Ok(db.with_default_content_type(
            self.config.engine.default_attachment_content_type.as_str(),
        ))
    }

    /// Close the store, flushing the pool.
    pub async fn close(self) {
        self.store.close().await;
    }
}

/// Load the configuration file (if any), apply `COUCHSQL_*` overrides and
/// finally the `--db-path` flag.
pub async fn load_config(config_path: Option<&Path>, db_path: Option<PathBuf>) -> Result<Config> {
    let mut config = ConfigLoader::new()
        .load_optional(config_path)
        .await
        .context("Failed to load configuration")?;
    if let Some(path) = db_path {
        config.storage.path = path;
        config.storage.in_memory = false;
    }
    Ok(config)
}

/// Translate the storage section into store options
pub fn store_options(config: &Config) -> StoreOptions {
    let storage = &config.storage;
    let options = if storage.in_memory {
        StoreOptions::in_memory()
    } else {
        StoreOptions::file(&storage.path)
    };
    options
        .with_max_connections(storage.max_connections)
        .with_busy_timeout(storage.busy_timeout())
        .with_create_if_missing(storage.create_if_missing)
}
